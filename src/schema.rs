//! Tool input schemas: typed field descriptors with validation.
//!
//! Tools declare their inputs as a flat set of field descriptors. The same
//! descriptors validate incoming arguments (collecting every violation,
//! not just the first) and render the `inputSchema` object that
//! `tools/list` advertises to clients.

use std::fmt;

use serde_json::{json, Map, Value};

/// Accepted JSON types for a tool input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One input field: type, requiredness, and optional constraints.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
    pub allowed_values: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl FieldSpec {
    pub fn new(
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: description.into(),
            required: false,
            allowed_values: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }
}

/// A single validation failure, scoped to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The full input schema for one tool.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Validate arguments, collecting all violations.
    ///
    /// `null` is treated as an empty argument object, matching clients
    /// that omit `arguments` entirely.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<FieldError>> {
        let empty = Map::new();
        let object = match value {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(vec![FieldError {
                    field: "arguments".to_string(),
                    message: format!("expected an object, got {}", json_type_name(other)),
                }])
            }
        };

        let mut errors = Vec::new();

        for spec in &self.fields {
            let Some(value) = object.get(&spec.name) else {
                if spec.required {
                    errors.push(FieldError {
                        field: spec.name.clone(),
                        message: "missing required field".to_string(),
                    });
                }
                continue;
            };

            if value.is_null() && !spec.required {
                continue;
            }

            if !spec.field_type.matches(value) {
                errors.push(FieldError {
                    field: spec.name.clone(),
                    message: format!(
                        "expected {}, got {}",
                        spec.field_type.type_name(),
                        json_type_name(value)
                    ),
                });
                continue;
            }

            if let (Some(allowed), Some(actual)) = (&spec.allowed_values, value.as_str()) {
                if !allowed.iter().any(|v| v == actual) {
                    errors.push(FieldError {
                        field: spec.name.clone(),
                        message: format!("must be one of {:?}, got '{}'", allowed, actual),
                    });
                }
            }

            if let Some(number) = value.as_f64() {
                if let Some(minimum) = spec.minimum {
                    if number < minimum {
                        errors.push(FieldError {
                            field: spec.name.clone(),
                            message: format!("must be >= {}, got {}", minimum, number),
                        });
                    }
                }
                if let Some(maximum) = spec.maximum {
                    if number > maximum {
                        errors.push(FieldError {
                            field: spec.name.clone(),
                            message: format!("must be <= {}, got {}", maximum, number),
                        });
                    }
                }
            }
        }

        for key in object.keys() {
            if !self.fields.iter().any(|spec| spec.name == *key) {
                errors.push(FieldError {
                    field: key.clone(),
                    message: "unknown field".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render the JSON Schema object advertised via `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for spec in &self.fields {
            let mut property = Map::new();
            property.insert("type".to_string(), json!(spec.field_type.type_name()));
            if !spec.description.is_empty() {
                property.insert("description".to_string(), json!(spec.description));
            }
            if let Some(allowed) = &spec.allowed_values {
                property.insert("enum".to_string(), json!(allowed));
            }
            if let Some(minimum) = spec.minimum {
                property.insert("minimum".to_string(), json!(minimum));
            }
            if let Some(maximum) = spec.maximum {
                property.insert("maximum".to_string(), json!(maximum));
            }
            properties.insert(spec.name.clone(), Value::Object(property));
            if spec.required {
                required.push(json!(spec.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
