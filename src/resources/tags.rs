//! Tag list resource.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    dispatch::{CachePolicy, ResourceContext, ResourceDef, ResourceHandler, ResourceRegistry},
    error::GatewayResult,
};

pub fn register(registry: &mut ResourceRegistry) -> GatewayResult<()> {
    registry.register(ResourceDef {
        pattern: "maas://tags",
        name: "tags",
        description: "All tags",
        resource_type: "TagList",
        handler: Arc::new(TagList),
        // Tag sets are operator-specific; keep shared caches out of it.
        cache: CachePolicy {
            private: true,
            ..Default::default()
        },
    })?;
    Ok(())
}

struct TagList;

#[async_trait]
impl ResourceHandler for TagList {
    async fn read(
        &self,
        ctx: ResourceContext,
        _params: &HashMap<String, String>,
    ) -> GatewayResult<Value> {
        let tags = ctx.maas.list_tags(&ctx.cancel).await?;
        Ok(json!(tags))
    }
}
