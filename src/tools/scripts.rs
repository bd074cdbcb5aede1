//! Commissioning/testing script upload.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::required_str;
use crate::{
    dispatch::{ToolContext, ToolDef, ToolHandler, ToolRegistry},
    error::GatewayResult,
    schema::{FieldSpec, FieldType, InputSchema},
};

/// Uploads carry file payloads, so they get a tighter derived timeout
/// than plain API calls.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

pub fn register(registry: &mut ToolRegistry) -> GatewayResult<()> {
    registry.register(ToolDef {
        name: "maas_upload_script",
        description: "Upload a commissioning or testing script",
        input_schema: InputSchema::new()
            .field(FieldSpec::new("name", FieldType::String, "Script name").required())
            .field(
                FieldSpec::new("content", FieldType::String, "Script body").required(),
            ),
        handler: Arc::new(UploadScript),
        long_running: false,
        timeout: Some(UPLOAD_TIMEOUT),
    })?;
    Ok(())
}

struct UploadScript;

#[async_trait]
impl ToolHandler for UploadScript {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let name = required_str(&args, "name")?;
        let content = required_str(&args, "content")?;
        let script = ctx
            .maas
            .upload_script(name, content.as_bytes().to_vec(), &ctx.cancel)
            .await?;
        Ok(json!(script))
    }
}
