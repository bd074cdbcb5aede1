//! Machine list and detail resources.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    dispatch::{CachePolicy, ResourceContext, ResourceDef, ResourceHandler, ResourceRegistry},
    error::{GatewayError, GatewayResult},
    schema::FieldError,
};

pub fn register(registry: &mut ResourceRegistry) -> GatewayResult<()> {
    registry.register(ResourceDef {
        pattern: "maas://machines",
        name: "machines",
        description: "All machines known to the region",
        resource_type: "MachineList",
        handler: Arc::new(MachineList),
        cache: CachePolicy::default(),
    })?;
    registry.register(ResourceDef {
        pattern: "maas://machines/{system_id}",
        name: "machine",
        description: "One machine by system id",
        resource_type: "Machine",
        // Machine state changes faster than inventory lists.
        cache: CachePolicy {
            ttl: Some(Duration::from_secs(60)),
            must_revalidate: true,
            ..Default::default()
        },
        handler: Arc::new(MachineDetail),
    })?;
    Ok(())
}

struct MachineList;

#[async_trait]
impl ResourceHandler for MachineList {
    async fn read(
        &self,
        ctx: ResourceContext,
        _params: &HashMap<String, String>,
    ) -> GatewayResult<Value> {
        let machines = ctx.maas.list_machines(&ctx.cancel).await?;
        Ok(json!(machines))
    }
}

struct MachineDetail;

#[async_trait]
impl ResourceHandler for MachineDetail {
    async fn read(
        &self,
        ctx: ResourceContext,
        params: &HashMap<String, String>,
    ) -> GatewayResult<Value> {
        let system_id = params.get("system_id").ok_or_else(|| {
            GatewayError::InvalidParameters(vec![FieldError {
                field: "system_id".to_string(),
                message: "missing URI parameter".to_string(),
            }])
        })?;
        let machine = ctx.maas.get_machine(system_id, &ctx.cancel).await?;
        Ok(json!(machine))
    }
}
