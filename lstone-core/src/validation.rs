/// Record validation
///
/// Attribute-level rules checked by the record validator collaborator.
/// Batch operations call it when they are asked to validate first.

use crate::{Error, Record, Result, Value};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Validates a single record before it is staged
pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: &Record) -> Result<()>;
}

/// Type constraint for an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Int,
    Number,
    Boolean,
    Timestamp,
}

impl AttributeType {
    /// Check if a value matches this type
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (AttributeType::String, Value::S(_)) => true,
            (AttributeType::Int, Value::Int(_)) => true,
            (AttributeType::Number, Value::Int(_) | Value::Float(_)) => true,
            (AttributeType::Boolean, Value::Bool(_)) => true,
            (AttributeType::Timestamp, Value::Ts(_)) => true,
            _ => false,
        }
    }
}

/// Value constraint for an attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueConstraint {
    /// Minimum value (for numbers)
    MinValue(f64),
    /// Maximum value (for numbers)
    MaxValue(f64),
    /// Minimum length in characters, after trimming (for strings)
    MinLength(usize),
    /// Maximum length in characters (for strings)
    MaxLength(usize),
    /// Must match regex pattern (for strings)
    Pattern(String),
    /// Must be one of these values, compared trimmed and lowercased
    OneOf(Vec<String>),
    /// Must not contain any of these substrings, case-insensitive
    Forbids(Vec<String>),
    /// Timestamp must not be in the future
    NotAfterNow,
    /// Timestamp must not be before this instant
    NotBefore(DateTime<Utc>),
}

impl ValueConstraint {
    /// Check a value; returns the violation message if it fails
    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            ValueConstraint::MinValue(min) => match value.as_f64() {
                Some(n) if n < *min => Err(format!("must be at least {} (got {})", min, n)),
                _ => Ok(()),
            },
            ValueConstraint::MaxValue(max) => match value.as_f64() {
                Some(n) if n > *max => Err(format!("must be at most {} (got {})", max, n)),
                _ => Ok(()),
            },
            ValueConstraint::MinLength(min) => match value {
                Value::S(s) if s.trim().chars().count() < *min => {
                    Err(format!("must be at least {} characters long", min))
                }
                _ => Ok(()),
            },
            ValueConstraint::MaxLength(max) => match value {
                Value::S(s) if s.chars().count() > *max => Err(format!(
                    "must be no more than {} characters long (got {} chars)",
                    max,
                    s.chars().count()
                )),
                _ => Ok(()),
            },
            ValueConstraint::Pattern(pattern) => {
                if let Value::S(s) = value {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| format!("invalid regex pattern: {}", e))?;
                    if !re.is_match(s.trim()) {
                        return Err(format!("value '{}' does not match pattern '{}'", s, pattern));
                    }
                }
                Ok(())
            }
            ValueConstraint::OneOf(allowed) => {
                if let Value::S(s) = value {
                    let normalized = s.trim().to_lowercase();
                    if !allowed.iter().any(|a| *a == normalized) {
                        return Err(format!("must be one of: {} (got {})", allowed.join(", "), normalized));
                    }
                }
                Ok(())
            }
            ValueConstraint::Forbids(markers) => {
                if let Value::S(s) = value {
                    let lower = s.to_lowercase();
                    if markers.iter().any(|m| lower.contains(m.as_str())) {
                        return Err("contains potentially unsafe content".to_string());
                    }
                }
                Ok(())
            }
            ValueConstraint::NotAfterNow => match value.as_timestamp() {
                Some(ts) if ts > Utc::now() => {
                    Err(format!("cannot be in the future (got {})", ts.format("%Y-%m-%d")))
                }
                _ => Ok(()),
            },
            ValueConstraint::NotBefore(limit) => match value.as_timestamp() {
                Some(ts) if ts < *limit => Err(format!(
                    "cannot be before {} (got {})",
                    limit.format("%Y-%m-%d"),
                    ts.format("%Y-%m-%d")
                )),
                _ => Ok(()),
            },
        }
    }
}

/// Rule for a single attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRule {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub constraints: Vec<ValueConstraint>,
}

impl AttributeRule {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            constraints: Vec::new(),
        }
    }

    /// Mark this attribute as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_constraint(mut self, constraint: ValueConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Collect every violation of this rule into `errors`
    fn check(&self, value: Option<&Value>, errors: &mut Vec<String>) {
        let value = match value {
            Some(v) if !v.is_blank() => v,
            _ => {
                if self.required {
                    errors.push(format!("{}: is required and cannot be empty", self.name));
                }
                return;
            }
        };

        if !self.attr_type.matches(value) {
            errors.push(format!("{}: has wrong type (expected {:?})", self.name, self.attr_type));
            return;
        }

        for constraint in &self.constraints {
            if let Err(msg) = constraint.check(value) {
                errors.push(format!("{}: {}", self.name, msg));
            }
        }
    }
}

/// Attribute-rule validator
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: Vec<AttributeRule>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<AttributeRule>) -> Self {
        Self { rules }
    }

    pub fn add_rule(&mut self, rule: AttributeRule) {
        self.rules.retain(|r| r.name != rule.name);
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[AttributeRule] {
        &self.rules
    }

    /// Default rules for workout records
    pub fn exercise() -> Self {
        let earliest = Utc
            .with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self::from_rules(vec![
            AttributeRule::new("name", AttributeType::String)
                .required()
                .with_constraint(ValueConstraint::MinLength(2))
                .with_constraint(ValueConstraint::MaxLength(100))
                .with_constraint(ValueConstraint::Pattern(r"^[\p{L}\p{N}\s'\-]+$".to_string())),
            AttributeRule::new("type", AttributeType::String)
                .required()
                .with_constraint(ValueConstraint::OneOf(
                    ["cardio", "strength", "flexibility", "sports", "other"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                )),
            AttributeRule::new("duration", AttributeType::Int)
                .required()
                .with_constraint(ValueConstraint::MinValue(1.0))
                .with_constraint(ValueConstraint::MaxValue(1440.0)),
            AttributeRule::new("calories", AttributeType::Int)
                .with_constraint(ValueConstraint::MinValue(0.0))
                .with_constraint(ValueConstraint::MaxValue(10_000.0)),
            AttributeRule::new("date", AttributeType::Timestamp)
                .required()
                .with_constraint(ValueConstraint::NotAfterNow)
                .with_constraint(ValueConstraint::NotBefore(earliest)),
            AttributeRule::new("description", AttributeType::String)
                .with_constraint(ValueConstraint::MaxLength(1000))
                .with_constraint(ValueConstraint::Forbids(
                    ["<script", "javascript:", "vbscript:", "onload=", "onerror=", "eval("]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                )),
        ])
    }

    fn collect(&self, record: &Record, partial: bool) -> Vec<String> {
        let mut errors = Vec::new();
        if record.id < 0 {
            errors.push(format!("id: must be non-negative (got {})", record.id));
        }
        for rule in &self.rules {
            let value = record.get(&rule.name);
            if partial && value.map_or(true, Value::is_blank) {
                continue;
            }
            rule.check(value, &mut errors);
        }
        errors
    }

    /// Check only the attributes present on the record (for partial updates)
    pub fn validate_partial(&self, record: &Record) -> Result<()> {
        into_result(self.collect(record, true))
    }
}

fn into_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(errors.join("; ")))
    }
}

impl RecordValidator for Validator {
    /// Reports every violation of the record in one error
    fn validate(&self, record: &Record) -> Result<()> {
        into_result(self.collect(record, false))
    }
}
