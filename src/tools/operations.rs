//! Operation introspection and control tools.
//!
//! These expose the tracker to clients that poll instead of consuming the
//! event stream.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::required_str;
use crate::{
    dispatch::{ToolContext, ToolDef, ToolHandler, ToolRegistry},
    error::GatewayResult,
    schema::{FieldSpec, FieldType, InputSchema},
};

pub fn register(registry: &mut ToolRegistry) -> GatewayResult<()> {
    registry.register(ToolDef {
        name: "maas_operation_status",
        description: "Inspect a long-running operation's status and progress",
        input_schema: operation_schema(),
        handler: Arc::new(OperationStatus),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_cancel_operation",
        description: "Cancel a long-running operation",
        input_schema: operation_schema(),
        handler: Arc::new(CancelOperation),
        long_running: false,
        timeout: None,
    })?;
    Ok(())
}

fn operation_schema() -> InputSchema {
    InputSchema::new().field(
        FieldSpec::new("operation_id", FieldType::String, "Operation id").required(),
    )
}

struct OperationStatus;

#[async_trait]
impl ToolHandler for OperationStatus {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let operation_id = required_str(&args, "operation_id")?;
        let snapshot = ctx.tracker.get_operation(operation_id)?;
        let events = ctx.tracker.get_events(operation_id)?;
        Ok(json!({
            "operation_id": snapshot.id,
            "status": snapshot.status,
            "progress": snapshot.progress,
            "started_at": snapshot.started_at,
            "updated_at": snapshot.updated_at,
            "result": snapshot.result,
            "error": snapshot.error.map(|e| json!({
                "message": e.message,
                "code": e.code,
            })),
            "event_count": events.len(),
        }))
    }
}

struct CancelOperation;

#[async_trait]
impl ToolHandler for CancelOperation {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let operation_id = required_str(&args, "operation_id")?;
        ctx.tracker.cancel_operation(operation_id)?;
        let snapshot = ctx.tracker.get_operation(operation_id)?;
        Ok(json!({
            "operation_id": snapshot.id,
            "status": snapshot.status,
        }))
    }
}
