//! Subnet list and detail resources.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    dispatch::{CachePolicy, ResourceContext, ResourceDef, ResourceHandler, ResourceRegistry},
    error::{GatewayError, GatewayResult},
    schema::FieldError,
};

pub fn register(registry: &mut ResourceRegistry) -> GatewayResult<()> {
    registry.register(ResourceDef {
        pattern: "maas://subnets",
        name: "subnets",
        description: "All subnets",
        resource_type: "SubnetList",
        handler: Arc::new(SubnetList),
        cache: CachePolicy::default(),
    })?;
    registry.register(ResourceDef {
        pattern: "maas://subnets/{id}",
        name: "subnet",
        description: "One subnet by id",
        resource_type: "Subnet",
        handler: Arc::new(SubnetDetail),
        cache: CachePolicy::default(),
    })?;
    Ok(())
}

struct SubnetList;

#[async_trait]
impl ResourceHandler for SubnetList {
    async fn read(
        &self,
        ctx: ResourceContext,
        _params: &HashMap<String, String>,
    ) -> GatewayResult<Value> {
        let subnets = ctx.maas.list_subnets(&ctx.cancel).await?;
        Ok(json!(subnets))
    }
}

struct SubnetDetail;

#[async_trait]
impl ResourceHandler for SubnetDetail {
    async fn read(
        &self,
        ctx: ResourceContext,
        params: &HashMap<String, String>,
    ) -> GatewayResult<Value> {
        let id: u64 = params
            .get("id")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                GatewayError::InvalidParameters(vec![FieldError {
                    field: "id".to_string(),
                    message: "subnet id must be an integer".to_string(),
                }])
            })?;
        let subnet = ctx.maas.get_subnet(id, &ctx.cancel).await?;
        Ok(json!(subnet))
    }
}
