//! Tool registry and execution pipeline.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use mmg_maas_client::MaasClient;
use mmg_progress::ProgressTracker;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cache::ResponseCache,
    error::{GatewayError, GatewayResult},
    protocol::{ToolDescriptor, ToolResult},
    schema::InputSchema,
};

/// Everything a tool handler needs: the derived cancellation scope plus
/// the process-wide singletons, passed explicitly rather than read from
/// globals.
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub tracker: ProgressTracker,
    pub maas: Arc<MaasClient>,
    pub cache: Arc<ResponseCache>,
    pub settings: Arc<ToolSettings>,
    /// Progress token from `_meta`, forwarded by the transport layer.
    pub progress_token: Option<Value>,
}

/// Tunables tool handlers need beyond their arguments.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub deploy_poll_interval: Duration,
    pub deploy_poll_limit: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            deploy_poll_interval: Duration::from_secs(5),
            deploy_poll_limit: 60,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value>;
}

/// A registered tool: schema, handler and execution policy.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: InputSchema,
    pub handler: Arc<dyn ToolHandler>,
    pub long_running: bool,
    /// Per-tool timeout; `None` for tools that manage their own deadline
    /// (e.g. the deploy poll loop).
    pub timeout: Option<Duration>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; duplicate names are a boot-time conflict.
    pub fn register(&mut self, def: ToolDef) -> GatewayResult<()> {
        if self.tools.contains_key(def.name) {
            return Err(GatewayError::Conflict(format!(
                "tool '{}' is already registered",
                def.name
            )));
        }
        self.tools.insert(def.name, def);
        Ok(())
    }

    /// Tool descriptors for `tools/list`.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|def| ToolDescriptor {
                name: def.name.to_string(),
                description: def.description.to_string(),
                input_schema: def.input_schema.to_json_schema(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call, returning the result envelope. Errors are
    /// translated through the taxonomy; this never fails outright.
    pub async fn execute(&self, ctx: ToolContext, name: &str, args: Value) -> ToolResult {
        match self.execute_inner(ctx, name, args).await {
            Ok(value) => ToolResult::json(&value),
            Err(error) => {
                warn!("Tool '{}' failed: {}", name, error);
                ToolResult::error(error.envelope_text())
            }
        }
    }

    async fn execute_inner(
        &self,
        ctx: ToolContext,
        name: &str,
        args: Value,
    ) -> GatewayResult<Value> {
        let def = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(format!("tool '{}'", name)))?;

        def.input_schema
            .validate(&args)
            .map_err(GatewayError::InvalidParameters)?;

        // The handler runs under a child scope so a per-tool timeout or a
        // caller cancel stops in-flight upstream work, first to fire.
        let scoped = ctx.cancel.child_token();
        let caller = ctx.cancel.clone();
        let handler_ctx = ToolContext {
            cancel: scoped.clone(),
            ..ctx
        };

        debug!("Executing tool '{}'", name);
        match def.timeout {
            Some(timeout) => {
                tokio::select! {
                    result = def.handler.call(handler_ctx, args) => result,
                    _ = tokio::time::sleep(timeout) => {
                        scoped.cancel();
                        Err(GatewayError::Timeout(format!(
                            "tool '{}' exceeded {}s",
                            name,
                            timeout.as_secs()
                        )))
                    }
                    _ = caller.cancelled() => {
                        Err(GatewayError::Cancelled(format!("tool '{}' cancelled", name)))
                    }
                }
            }
            None => {
                tokio::select! {
                    result = def.handler.call(handler_ctx, args) => result,
                    _ = caller.cancelled() => {
                        Err(GatewayError::Cancelled(format!("tool '{}' cancelled", name)))
                    }
                }
            }
        }
    }
}
