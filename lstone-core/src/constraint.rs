/// Constraint engine
///
/// Named, enable-able validation rules evaluated against candidate records
/// before a commit publishes them. Constraints are kept in insertion order.

use crate::{Error, Record, Result, Value, CALORIES_FIELD, DURATION_FIELD};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The one check expression the engine understands
pub const TYPE_CHECK_EXPRESSION: &str = "type IN ('cardio', 'strength', 'flexibility')";

const CHECKED_TYPES: [&str; 3] = ["cardio", "strength", "flexibility"];

/// Fixed bounds used by range constraints, per column
const RANGE_BOUNDS: [(&str, i64, i64); 2] = [(DURATION_FIELD, 0, 1440), (CALORIES_FIELD, 0, 10_000)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    NotNull,
    Unique,
    PrimaryKey,
    ForeignKey,
    Check,
    Range,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub columns: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, constraint_type: ConstraintType) -> Self {
        Self {
            name: name.into(),
            constraint_type,
            expression: String::new(),
            columns: Vec::new(),
            enabled: true,
            created_at: Utc::now(),
            description: None,
        }
    }

    pub fn not_null(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, ConstraintType::NotNull).with_columns(columns)
    }

    pub fn range(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, ConstraintType::Range).with_columns(columns)
    }

    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(name, ConstraintType::Check).with_expression(expression)
    }

    pub fn unique(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, ConstraintType::Unique).with_columns(columns)
    }

    pub fn regex(name: impl Into<String>, columns: &[&str], pattern: impl Into<String>) -> Self {
        Self::new(name, ConstraintType::Regex)
            .with_columns(columns)
            .with_expression(pattern)
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered set of constraints with unique names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn list(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn get(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Check that `constraint` could be added, without adding it
    pub fn check_addable(&self, constraint: &Constraint) -> Result<()> {
        if constraint.name.trim().is_empty() {
            return Err(Error::InvalidArgument("constraint name must not be empty".into()));
        }
        match constraint.constraint_type {
            ConstraintType::PrimaryKey | ConstraintType::ForeignKey => {
                return Err(Error::InvalidArgument(format!(
                    "constraint type {:?} is not supported",
                    constraint.constraint_type
                )));
            }
            ConstraintType::Regex => {
                Regex::new(&constraint.expression).map_err(|e| {
                    Error::InvalidArgument(format!("invalid regex {}: {}", constraint.expression, e))
                })?;
            }
            _ => {}
        }
        if self.get(&constraint.name).is_some() {
            return Err(Error::Conflict(format!(
                "constraint with name {} already exists",
                constraint.name
            )));
        }
        Ok(())
    }

    /// Add a constraint, enabled and stamped with the current time
    pub fn add(&mut self, mut constraint: Constraint) -> Result<()> {
        self.check_addable(&constraint)?;
        constraint.enabled = true;
        constraint.created_at = Utc::now();
        self.constraints.push(constraint);
        Ok(())
    }

    /// Remove a constraint by name, keeping the order of the rest
    pub fn remove(&mut self, name: &str) -> Result<Constraint> {
        let pos = self
            .constraints
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("constraint {}", name)))?;
        Ok(self.constraints.remove(pos))
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let constraint = self
            .constraints
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("constraint {}", name)))?;
        constraint.enabled = enabled;
        Ok(())
    }

    /// Evaluate every enabled constraint against every record.
    /// The first violation aborts with an error naming the constraint.
    pub fn validate(&self, records: &[Record]) -> Result<()> {
        for constraint in self.constraints.iter().filter(|c| c.enabled) {
            if constraint.constraint_type == ConstraintType::Unique {
                validate_unique(constraint, records)
                    .map_err(|msg| Error::constraint_violation(&constraint.name, msg))?;
                continue;
            }

            let regex = match constraint.constraint_type {
                ConstraintType::Regex => Some(Regex::new(&constraint.expression).map_err(|e| {
                    Error::InvalidArgument(format!("invalid regex {}: {}", constraint.expression, e))
                })?),
                _ => None,
            };

            for record in records {
                validate_record(constraint, regex.as_ref(), record)
                    .map_err(|msg| Error::constraint_violation(&constraint.name, msg))?;
            }
        }
        Ok(())
    }
}

fn validate_record(
    constraint: &Constraint,
    regex: Option<&Regex>,
    record: &Record,
) -> std::result::Result<(), String> {
    match constraint.constraint_type {
        ConstraintType::NotNull => {
            for column in &constraint.columns {
                let blank = record.field(column).map_or(true, |v| v.is_blank());
                if blank {
                    return Err(format!("{} cannot be null (record {})", column, record.id));
                }
            }
            Ok(())
        }
        // Bounds are fixed per column; the expression text is not parsed
        ConstraintType::Range => {
            for column in &constraint.columns {
                let Some((_, min, max)) = RANGE_BOUNDS.iter().find(|(c, _, _)| *c == column.as_str()) else {
                    continue;
                };
                if let Some(n) = record.field(column).as_ref().and_then(Value::as_f64) {
                    if n < *min as f64 || n > *max as f64 {
                        return Err(format!(
                            "{} must be between {} and {} (record {} has {})",
                            column, min, max, record.id, n
                        ));
                    }
                }
            }
            Ok(())
        }
        ConstraintType::Check => {
            if constraint.expression != TYPE_CHECK_EXPRESSION {
                return Ok(());
            }
            match record.record_type() {
                Some(t) if CHECKED_TYPES.contains(&t) => Ok(()),
                other => Err(format!(
                    "invalid exercise type: {} (record {})",
                    other.unwrap_or(""),
                    record.id
                )),
            }
        }
        ConstraintType::Regex => {
            let Some(re) = regex else { return Ok(()) };
            for column in &constraint.columns {
                if let Some(Value::S(s)) = record.field(column) {
                    if !re.is_match(&s) {
                        return Err(format!(
                            "{} value {:?} does not match {} (record {})",
                            column, s, constraint.expression, record.id
                        ));
                    }
                }
            }
            Ok(())
        }
        ConstraintType::Unique | ConstraintType::PrimaryKey | ConstraintType::ForeignKey => Ok(()),
    }
}

fn validate_unique(constraint: &Constraint, records: &[Record]) -> std::result::Result<(), String> {
    for column in &constraint.columns {
        let mut seen = HashSet::new();
        for record in records {
            let Some(value) = record.field(column) else { continue };
            if value.is_null() {
                continue;
            }
            if !seen.insert(value.to_string()) {
                return Err(format!("duplicate value {} in column {}", value, column));
            }
        }
    }
    Ok(())
}
