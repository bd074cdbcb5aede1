//! Tag management tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str};
use crate::{
    dispatch::{ToolContext, ToolDef, ToolHandler, ToolRegistry},
    error::GatewayResult,
    schema::{FieldSpec, FieldType, InputSchema},
};

pub fn register(registry: &mut ToolRegistry) -> GatewayResult<()> {
    registry.register(ToolDef {
        name: "maas_list_tags",
        description: "List all tags defined in the MAAS region",
        input_schema: InputSchema::new(),
        handler: Arc::new(ListTags),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_create_tag",
        description: "Create a new tag",
        input_schema: InputSchema::new()
            .field(FieldSpec::new("name", FieldType::String, "Tag name").required())
            .field(FieldSpec::new(
                "comment",
                FieldType::String,
                "Human-readable description",
            )),
        handler: Arc::new(CreateTag),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_tag_machine",
        description: "Apply a tag to a machine",
        input_schema: tag_machine_schema(),
        handler: Arc::new(UpdateMachineTag { add: true }),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_untag_machine",
        description: "Remove a tag from a machine",
        input_schema: tag_machine_schema(),
        handler: Arc::new(UpdateMachineTag { add: false }),
        long_running: false,
        timeout: None,
    })?;
    Ok(())
}

fn tag_machine_schema() -> InputSchema {
    InputSchema::new()
        .field(FieldSpec::new("tag", FieldType::String, "Tag name").required())
        .field(FieldSpec::new("system_id", FieldType::String, "Machine system id").required())
}

struct ListTags;

#[async_trait]
impl ToolHandler for ListTags {
    async fn call(&self, ctx: ToolContext, _args: Value) -> GatewayResult<Value> {
        let tags = ctx.maas.list_tags(&ctx.cancel).await?;
        Ok(json!({ "count": tags.len(), "tags": tags }))
    }
}

struct CreateTag;

#[async_trait]
impl ToolHandler for CreateTag {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let name = required_str(&args, "name")?;
        let comment = optional_str(&args, "comment");
        let tag = ctx
            .maas
            .create_tag(name, comment.as_deref(), &ctx.cancel)
            .await?;
        ctx.cache.invalidate_resource_type("TagList");
        Ok(json!(tag))
    }
}

struct UpdateMachineTag {
    add: bool,
}

#[async_trait]
impl ToolHandler for UpdateMachineTag {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let tag = required_str(&args, "tag")?;
        let system_id = required_str(&args, "system_id")?;
        let result = if self.add {
            ctx.maas.tag_machine(tag, system_id, &ctx.cancel).await?
        } else {
            ctx.maas.untag_machine(tag, system_id, &ctx.cancel).await?
        };
        ctx.cache.invalidate_resource_type("TagList");
        ctx.cache.invalidate_resource_type("Machine");
        ctx.cache.invalidate_resource_type("MachineList");
        Ok(json!({
            "tag": tag,
            "system_id": system_id,
            "added": self.add,
            "result": result,
        }))
    }
}
