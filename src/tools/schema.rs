//! Tool input schemas.
//!
//! Schemas are JSON Schema objects, compiled once at registration. Call
//! arguments are validated against the compiled schema before the call
//! enters the engine, nested properties and keywords such as `minimum`
//! included.

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::{json, Value};

use crate::error::{McpError, Result};

/// JSON Schema describing a tool's arguments
#[derive(Clone)]
pub struct InputSchema {
    raw: Value,
    // None for the empty schema, which accepts any object
    compiled: Option<Arc<JSONSchema>>,
}

impl InputSchema {
    /// Wrap and compile a schema; it must describe an object
    pub fn new(schema: Value) -> Result<Self> {
        let Value::Object(mut object) = schema else {
            return Err(McpError::InvalidSchema(
                "input schema must be a JSON object".to_string(),
            ));
        };

        match object.get("type") {
            None => {
                object.insert("type".to_string(), json!("object"));
            },
            Some(Value::String(t)) if t == "object" => {},
            Some(other) => {
                return Err(McpError::InvalidSchema(format!(
                    "input schema type must be \"object\", got {other}"
                )))
            },
        }

        let raw = Value::Object(object);
        let compiled = JSONSchema::compile(&raw)
            .map_err(|e| McpError::InvalidSchema(e.to_string()))?;

        Ok(Self {
            raw,
            compiled: Some(Arc::new(compiled)),
        })
    }

    /// Schema accepting any argument object
    pub fn empty() -> Self {
        Self {
            raw: json!({"type": "object", "properties": {}}),
            compiled: None,
        }
    }

    /// Raw schema value
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    /// Check call arguments against the schema.
    ///
    /// All violations are reported, joined with `"; "`.
    pub fn validate(&self, arguments: &Value) -> std::result::Result<(), String> {
        let Some(compiled) = &self.compiled else {
            return if arguments.is_object() {
                Ok(())
            } else {
                Err(format!("{arguments} is not of type \"object\""))
            };
        };

        compiled.validate(arguments).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for InputSchema {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InputSchema").field(&self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_schema() -> InputSchema {
        InputSchema::new(json!({
            "type": "object",
            "properties": {
                "property_id": {"type": ["string", "integer"]},
                "dimensions": {"type": "array"},
                "limit": {"type": "integer"}
            },
            "required": ["property_id", "dimensions"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let schema = report_schema();
        assert!(schema
            .validate(&json!({"property_id": 123, "dimensions": ["city"]}))
            .is_ok());
        assert!(schema
            .validate(&json!({"property_id": "properties/1", "dimensions": [], "extra": true}))
            .is_ok());
    }

    #[test]
    fn test_invalid_arguments() {
        let schema = report_schema();
        let err = schema.validate(&json!({"property_id": 1})).unwrap_err();
        assert!(err.contains("dimensions"));

        let err = schema
            .validate(&json!({"property_id": 1, "dimensions": [], "limit": 2.5}))
            .unwrap_err();
        assert!(err.contains("limit"));

        assert!(schema.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_closed_schema() {
        let schema = InputSchema::new(json!({
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }))
        .unwrap();
        assert_eq!(schema.as_value()["type"], "object");
        assert!(schema.validate(&json!({"a": "x"})).is_ok());
        assert!(schema.validate(&json!({"b": "x"})).is_err());
    }

    #[test]
    fn test_nested_constraints() {
        let schema = InputSchema::new(json!({
            "properties": {
                "date_ranges": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"start_date": {"type": "string"}},
                        "required": ["start_date"]
                    }
                },
                "limit": {"type": "integer", "minimum": 1}
            }
        }))
        .unwrap();

        assert!(schema
            .validate(&json!({"date_ranges": [{"start_date": "7daysAgo"}], "limit": 10}))
            .is_ok());

        let err = schema
            .validate(&json!({"date_ranges": [42], "limit": -5}))
            .unwrap_err();
        assert!(err.contains("/date_ranges/0"), "{err}");
        assert!(err.contains("/limit"), "{err}");

        let err = schema
            .validate(&json!({"date_ranges": [{"end_date": "today"}]}))
            .unwrap_err();
        assert!(err.contains("start_date"), "{err}");
    }

    #[test]
    fn test_rejects_bad_schemas() {
        assert!(InputSchema::new(json!("object")).is_err());
        assert!(InputSchema::new(json!({"type": "array"})).is_err());
        assert!(InputSchema::new(json!({"properties": []})).is_err());
        assert!(InputSchema::new(json!({"required": [1]})).is_err());
        assert!(InputSchema::new(json!({"properties": {"a": {"type": "decimal"}}})).is_err());
    }
}
