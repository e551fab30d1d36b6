//! Structural schemas inferred from example JSON.
//!
//! A template's `schema` block is an example of the answer the model
//! should give. Objects keep their keys, arrays take the shape of their
//! first element, and every leaf becomes a string field. String leaves
//! double as the field's description.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Field under which structured answers are wrapped on the wire.
pub const WRAPPER_FIELD: &str = "schema";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    Object(IndexMap<String, Schema>),
    Array(Box<Schema>),
    String { description: Option<String> },
    /// Element shape of an empty example array; accepts anything.
    Unknown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{path}: expected {expected}, found {found}")]
    Mismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{path}: missing required field")]
    Missing { path: String },
}

impl Schema {
    /// Infer a schema from example data.
    pub fn from_example(example: &Value) -> Self {
        match example {
            Value::Object(map) => Schema::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Schema::from_example(v)))
                    .collect(),
            ),
            Value::Array(items) => Schema::Array(Box::new(
                items.first().map_or(Schema::Unknown, Schema::from_example),
            )),
            Value::String(s) => Schema::String {
                description: Some(s.clone()),
            },
            _ => Schema::String { description: None },
        }
    }

    /// `{schema: self}`, the shape clients request from providers.
    pub fn wrapped(&self) -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(WRAPPER_FIELD.to_string(), self.clone());
        Schema::Object(fields)
    }

    /// Check `value` against the schema and return it.
    ///
    /// Extra object keys are dropped from the returned value. Numbers and
    /// booleans in string positions are coerced to their JSON text, since
    /// models frequently answer `3` where `"3"` was asked for.
    pub fn validate(&self, value: &Value) -> Result<Value, SchemaError> {
        self.check(value, "$")
    }

    fn check(&self, value: &Value, path: &str) -> Result<Value, SchemaError> {
        match (self, value) {
            (Schema::Unknown, v) => Ok(v.clone()),
            (Schema::String { .. }, Value::String(_)) => Ok(value.clone()),
            (Schema::String { .. }, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Schema::String { .. }, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (Schema::Array(item), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| item.check(v, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Schema::Object(fields), Value::Object(map)) => {
                let mut out = Map::new();
                for (key, field) in fields {
                    let child = format!("{path}.{key}");
                    let v = map
                        .get(key)
                        .ok_or_else(|| SchemaError::Missing { path: child.clone() })?;
                    out.insert(key.clone(), field.check(v, &child)?);
                }
                Ok(Value::Object(out))
            }
            (expected, found) => Err(SchemaError::Mismatch {
                path: path.to_string(),
                expected: expected.kind(),
                found: kind_of(found),
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Schema::Object(_) => "object",
            Schema::Array(_) => "array",
            Schema::String { .. } => "string",
            Schema::Unknown => "any",
        }
    }

    /// JSON Schema rendering for providers that accept one.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Schema::Object(fields) => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_schema()))
                    .collect();
                let required: Vec<&String> = fields.keys().collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                })
            }
            Schema::Array(item) => json!({ "type": "array", "items": item.to_json_schema() }),
            Schema::String {
                description: Some(d),
            } => json!({ "type": "string", "description": d }),
            Schema::String { description: None } => json!({ "type": "string" }),
            Schema::Unknown => json!({}),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
