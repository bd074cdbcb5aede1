//! Concrete MAAS tools exposed over `tools/call`.

pub mod machines;
pub mod operations;
pub mod scripts;
pub mod tags;

use serde_json::Value;

use crate::{
    dispatch::ToolRegistry,
    error::{GatewayError, GatewayResult},
    schema::FieldError,
};

/// Register every tool. Called once at boot.
pub fn register_all(registry: &mut ToolRegistry) -> GatewayResult<()> {
    machines::register(registry)?;
    tags::register(registry)?;
    scripts::register(registry)?;
    operations::register(registry)?;
    Ok(())
}

/// Extract a required string argument. The schema gate guarantees
/// presence; this also covers handlers invoked directly in tests.
pub(crate) fn required_str<'a>(args: &'a Value, field: &str) -> GatewayResult<&'a str> {
    args.get(field).and_then(Value::as_str).ok_or_else(|| {
        GatewayError::InvalidParameters(vec![FieldError {
            field: field.to_string(),
            message: "missing required field".to_string(),
        }])
    })
}

pub(crate) fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

pub(crate) fn optional_u64(args: &Value, field: &str) -> Option<u64> {
    args.get(field).and_then(Value::as_u64)
}

pub(crate) fn string_array(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
