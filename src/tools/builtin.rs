//! Tools shipped with the server.
//!
//! Analytics backends register their own tools next to these; the built-ins
//! need no credentials and exist so a fresh deployment can be smoke-tested.

use std::str::FromStr;

use chrono::Utc;
use serde_json::{json, Value};

use super::{InputSchema, ToolDescriptor, ToolError, ToolRegistry};
use crate::error::Result;

/// Name of the property resource-name tool
pub const PROPERTY_RESOURCE_NAME: &str = "property_resource_name";
/// Name of the clock tool
pub const SERVER_TIME: &str = "server_time";

/// Register every built-in tool
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(property_resource_name()?)?;
    registry.register(server_time()?)?;
    Ok(())
}

/// Normalize a property id to `properties/<digits>`.
///
/// Accepts an integer, a digit string or an already-qualified resource name.
pub fn property_resource_name_of(value: &Value) -> std::result::Result<String, ToolError> {
    let id = match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| invalid_property(value))?,
        Value::String(s) => {
            let s = s.trim();
            let digits = s.strip_prefix("properties/").unwrap_or(s);
            // from_str alone would also take a leading '+'
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid_property(value));
            }
            u64::from_str(digits).map_err(|_| invalid_property(value))?
        },
        _ => return Err(invalid_property(value)),
    };

    Ok(format!("properties/{id}"))
}

fn invalid_property(value: &Value) -> ToolError {
    ToolError::new(format!(
        "invalid property id {value}: expected a number, a digit string or properties/<number>"
    ))
    .with_detail(json!({"property_id": value}))
}

fn property_resource_name() -> Result<ToolDescriptor> {
    let schema = InputSchema::new(json!({
        "type": "object",
        "properties": {
            "property_id": {
                "type": ["string", "integer"],
                "description": "Property id as a number, a digit string or properties/<number>"
            }
        },
        "required": ["property_id"]
    }))?;

    Ok(ToolDescriptor::from_fn(
        PROPERTY_RESOURCE_NAME,
        "Normalize an analytics property id to its resource name",
        schema,
        |args, _ctx| async move {
            let name = property_resource_name_of(&args["property_id"])?;
            Ok(json!({"resource_name": name}))
        },
    ))
}

fn server_time() -> Result<ToolDescriptor> {
    let schema = InputSchema::new(json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    }))?;

    Ok(ToolDescriptor::from_fn(
        SERVER_TIME,
        "Current server time in UTC",
        schema,
        |_args, _ctx| async move {
            let now = Utc::now();
            Ok(json!({
                "utc": now.to_rfc3339(),
                "unix_millis": now.timestamp_millis(),
            }))
        },
    ))
}
