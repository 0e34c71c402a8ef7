/// Schema registry
///
/// Holds the current typed schema and its history, and decides whether a
/// proposed schema is a compatible evolution of the current one.

use crate::{Error, Record, Result, Value, ID_FIELD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    String,
    Float,
    Boolean,
    Timestamp,
    Date,
    Array,
    Map,
    Struct,
}

impl FieldType {
    /// Whether a column of this type may change to `new` without rewriting data.
    ///
    /// int -> float, string; float -> string; date -> timestamp, string.
    /// Identical types are always compatible.
    pub fn can_evolve_to(&self, new: FieldType) -> bool {
        if *self == new {
            return true;
        }
        matches!(
            (self, new),
            (FieldType::Int, FieldType::Float)
                | (FieldType::Int, FieldType::String)
                | (FieldType::Float, FieldType::String)
                | (FieldType::Date, FieldType::Timestamp)
                | (FieldType::Date, FieldType::String)
        )
    }

    /// Check if a value matches this type (Null matches every type)
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldType::String, Value::S(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Timestamp | FieldType::Date, Value::Ts(_)) => true,
            _ => false,
        }
    }
}

/// A column in the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
            default_value: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, true)
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, false)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    fn has_default(&self) -> bool {
        matches!(&self.default_value, Some(v) if !v.is_null())
    }
}

/// Table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: i64,
    pub version: i64,
    pub fields: Vec<Field>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Schema {
    /// A proposed schema; id, version and creation time are assigned on evolution
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            id: 0,
            version: 0,
            fields,
            created_at: Utc::now(),
            properties: BTreeMap::new(),
        }
    }

    /// Initial schema of the workout table
    pub fn exercise() -> Self {
        Self {
            id: 1,
            version: 1,
            fields: vec![
                Field::required("id", FieldType::Int),
                Field::required("name", FieldType::String),
                Field::required("type", FieldType::String),
                Field::required("duration", FieldType::Int),
                Field::required("calories", FieldType::Int),
                Field::required("date", FieldType::Timestamp),
                Field::nullable("description", FieldType::String),
            ],
            created_at: Utc::now(),
            properties: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Builder: append a field
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Bring `record` in line with this schema before it is written.
    ///
    /// Missing or null fields take the field default when there is one;
    /// otherwise they must be nullable. Present values must match the field
    /// type. Attributes the schema does not name are kept as they are.
    pub fn conform(&self, record: &mut Record) -> Result<()> {
        for field in self.fields.iter().filter(|f| f.name != ID_FIELD) {
            let present = record.get(&field.name).map_or(false, |v| !v.is_null());
            if !present {
                if let Some(default) = field.default_value.as_ref().filter(|v| !v.is_null()) {
                    record.set(field.name.clone(), default.clone());
                    continue;
                }
                if !field.nullable {
                    return Err(Error::validation(format!(
                        "record {}: field {} is required",
                        record.id, field.name
                    )));
                }
                continue;
            }

            if let Some(value) = record.get(&field.name) {
                if !field.field_type.matches(value) {
                    return Err(Error::validation(format!(
                        "record {}: field {} expects {:?}, got {}",
                        record.id, field.name, field.field_type, value
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Field-level diff between two schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChanges {
    pub added_fields: Vec<String>,
    pub removed_fields: Vec<String>,
    /// Fields whose type or nullability changed
    pub modified_fields: Vec<String>,
}

impl SchemaChanges {
    pub fn between(old: &Schema, new: &Schema) -> Self {
        let mut changes = SchemaChanges::default();

        for field in &new.fields {
            match old.field(&field.name) {
                Some(prev) => {
                    if prev.field_type != field.field_type || prev.nullable != field.nullable {
                        changes.modified_fields.push(field.name.clone());
                    }
                }
                None => changes.added_fields.push(field.name.clone()),
            }
        }

        for field in &old.fields {
            if new.field(&field.name).is_none() {
                changes.removed_fields.push(field.name.clone());
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty() && self.removed_fields.is_empty() && self.modified_fields.is_empty()
    }
}

/// Reject a proposed schema that is not a compatible evolution of `current`.
///
/// Structural problems (empty or duplicate field names) are `InvalidArgument`;
/// incompatible changes are `Conflict`.
pub fn validate_compatibility(current: &Schema, proposed: &Schema) -> Result<()> {
    let mut seen = HashSet::new();
    for field in &proposed.fields {
        if field.name.trim().is_empty() {
            return Err(Error::InvalidArgument("schema field name must not be empty".into()));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate field {} in schema",
                field.name
            )));
        }
    }

    let existing: HashMap<&str, &Field> =
        current.fields.iter().map(|f| (f.name.as_str(), f)).collect();

    for field in &proposed.fields {
        match existing.get(field.name.as_str()) {
            Some(prev) => {
                if !prev.field_type.can_evolve_to(field.field_type) {
                    return Err(Error::Conflict(format!(
                        "field {} type change from {:?} to {:?} is not compatible",
                        field.name, prev.field_type, field.field_type
                    )));
                }
                if prev.nullable && !field.nullable {
                    return Err(Error::Conflict(format!(
                        "field {} cannot change from nullable to non-nullable",
                        field.name
                    )));
                }
            }
            None => {
                if !field.nullable && !field.has_default() {
                    return Err(Error::Conflict(format!(
                        "new field {} must be nullable or have a default value",
                        field.name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Current schema plus every schema the table has had
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    current: Schema,
    history: Vec<Schema>,
}

impl SchemaRegistry {
    pub fn new(initial: Schema) -> Self {
        Self {
            history: vec![initial.clone()],
            current: initial,
        }
    }

    /// Restore a registry from persisted parts
    pub fn from_parts(current: Schema, mut history: Vec<Schema>) -> Self {
        if history.last().map(|s| s.id) != Some(current.id) {
            history.push(current.clone());
        }
        Self { current, history }
    }

    pub fn current(&self) -> &Schema {
        &self.current
    }

    /// Oldest first
    pub fn history(&self) -> &[Schema] {
        &self.history
    }

    /// Validate `proposed` and stamp it as the successor of the current schema.
    /// The registry is not modified; call `install` once the change is durable.
    pub fn prepare(&self, proposed: &Schema) -> Result<(Schema, SchemaChanges)> {
        validate_compatibility(&self.current, proposed)?;

        let mut next = proposed.clone();
        next.id = self.current.id + 1;
        next.version = self.current.version + 1;
        next.created_at = Utc::now();

        let changes = SchemaChanges::between(&self.current, &next);
        Ok((next, changes))
    }

    pub fn install(&mut self, schema: Schema) {
        self.history.push(schema.clone());
        self.current = schema;
    }
}
