//! Structural checks on model answers to templated prompts.
//!
//! The engine never interprets an answer; it only confirms the answer has the
//! JSON shape the caller's template asked for before anyone acts on it.

use std::collections::HashMap;

use serde_json::Value;

use super::policy::names;

/// JSON value kinds a schema can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
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

/// Why an answer was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("answer is not a JSON object or array: {0}")]
    NotJson(String),
    #[error("{path}: expected {expected}, found {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{path}: missing required field '{field}'")]
    MissingField { path: String, field: String },
}

/// Shape of an expected answer: required fields and property types.
/// Unlisted properties are allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    kind: JsonType,
    required: Vec<String>,
    properties: Vec<(String, JsonType)>,
    items: Option<Box<ResponseSchema>>,
}

impl ResponseSchema {
    pub fn object() -> Self {
        Self {
            kind: JsonType::Object,
            required: Vec::new(),
            properties: Vec::new(),
            items: None,
        }
    }

    pub fn array_of(items: ResponseSchema) -> Self {
        Self {
            kind: JsonType::Array,
            required: Vec::new(),
            properties: Vec::new(),
            items: Some(Box::new(items)),
        }
    }

    pub fn property(mut self, name: &str, kind: JsonType) -> Self {
        self.properties.push((name.to_string(), kind));
        self
    }

    /// Declare a property and require it.
    pub fn required(mut self, name: &str, kind: JsonType) -> Self {
        self.required.push(name.to_string());
        self.property(name, kind)
    }

    pub fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.check_at(value, "$")
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), SchemaViolation> {
        if !self.kind.matches(value) {
            return Err(SchemaViolation::WrongType {
                path: path.to_string(),
                expected: self.kind.as_str(),
                found: kind_of(value),
            });
        }

        if let Value::Object(map) = value {
            if let Some(field) = self.required.iter().find(|f| !map.contains_key(f.as_str())) {
                return Err(SchemaViolation::MissingField {
                    path: path.to_string(),
                    field: field.clone(),
                });
            }
            for (name, kind) in &self.properties {
                if let Some(found) = map.get(name) {
                    if !kind.matches(found) {
                        return Err(SchemaViolation::WrongType {
                            path: format!("{path}.{name}"),
                            expected: kind.as_str(),
                            found: kind_of(found),
                        });
                    }
                }
            }
        }

        if let (Value::Array(elements), Some(items)) = (value, &self.items) {
            for (i, element) in elements.iter().enumerate() {
                items.check_at(element, &format!("{path}[{i}]"))?;
            }
        }

        Ok(())
    }
}

/// Fixed set of schemas keyed by template name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResponseSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schemas for the game-side templates.
    pub fn builtin() -> Self {
        Self::new()
            .with(
                names::SUGGEST_CLASSIFY,
                ResponseSchema::object()
                    .required("suggestion_type", JsonType::String)
                    .property("reasoning", JsonType::String)
                    .property("confidence", JsonType::Number),
            )
            .with(
                names::SUGGEST_MAP,
                ResponseSchema::object()
                    .required("id", JsonType::Integer)
                    .required("value", JsonType::String),
            )
            .with(
                names::RULE_MAP,
                ResponseSchema::object()
                    .required("id", JsonType::Integer)
                    .required("text", JsonType::String)
                    .property("summary", JsonType::String)
                    .property("impact", JsonType::Integer),
            )
            .with(
                names::CHAT_ANALYSIS,
                ResponseSchema::array_of(
                    ResponseSchema::object()
                        .required("alias_id", JsonType::String)
                        .property("reason_summary", JsonType::String),
                ),
            )
    }

    pub fn with(mut self, name: &str, schema: ResponseSchema) -> Self {
        self.schemas.insert(name.to_string(), schema);
        self
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Check a raw answer against the schema for `name`.
    ///
    /// Templates without a schema always pass.
    pub fn validate(&self, name: &str, raw: &str) -> Result<(), SchemaViolation> {
        let Some(schema) = self.schemas.get(name) else {
            return Ok(());
        };

        let trimmed = raw.trim();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Err(SchemaViolation::NotJson(
                "answer does not start with '{' or '['".to_string(),
            ));
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| SchemaViolation::NotJson(e.to_string()))?;

        schema.check(&value)
    }

    pub fn is_valid(&self, name: &str, raw: &str) -> bool {
        self.validate(name, raw).is_ok()
    }
}
