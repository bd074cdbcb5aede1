//! Machine lifecycle tools: list, inspect, allocate, deploy, release, power.

use std::sync::Arc;

use async_trait::async_trait;
use mmg_maas_client::{AllocateParams, DeployParams};
use mmg_progress::{LogLevel, Reporter};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{optional_str, optional_u64, required_str, string_array};
use crate::{
    cache::{CacheOptions, ResponseCache},
    dispatch::{ToolContext, ToolDef, ToolHandler, ToolRegistry},
    error::{GatewayError, GatewayResult},
    schema::{FieldSpec, FieldType, InputSchema},
};

pub fn register(registry: &mut ToolRegistry) -> GatewayResult<()> {
    registry.register(ToolDef {
        name: "maas_list_machines",
        description: "List all machines known to the MAAS region",
        input_schema: InputSchema::new(),
        handler: Arc::new(ListMachines),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_get_machine_details",
        description: "Fetch details for one machine by system id",
        input_schema: InputSchema::new().field(
            FieldSpec::new("system_id", FieldType::String, "Machine system id").required(),
        ),
        handler: Arc::new(GetMachineDetails),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_allocate_machine",
        description: "Allocate a ready machine matching the given constraints",
        input_schema: InputSchema::new()
            .field(FieldSpec::new(
                "hostname",
                FieldType::String,
                "Require a specific hostname",
            ))
            .field(FieldSpec::new(
                "architecture",
                FieldType::String,
                "Require an architecture, e.g. amd64/generic",
            ))
            .field(
                FieldSpec::new("cpu_count", FieldType::Integer, "Minimum CPU count").minimum(1.0),
            )
            .field(
                FieldSpec::new("memory", FieldType::Integer, "Minimum RAM in MB").minimum(1.0),
            )
            .field(FieldSpec::new(
                "tags",
                FieldType::Array,
                "Require all of these tags",
            ))
            .field(FieldSpec::new(
                "zone",
                FieldType::String,
                "Require a specific zone",
            )),
        handler: Arc::new(AllocateMachine),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_deploy_machine",
        description: "Deploy an operating system to an allocated machine and \
                      track progress until it completes",
        input_schema: InputSchema::new()
            .field(
                FieldSpec::new("system_id", FieldType::String, "Machine system id").required(),
            )
            .field(FieldSpec::new(
                "osystem",
                FieldType::String,
                "Operating system, e.g. ubuntu",
            ))
            .field(FieldSpec::new(
                "distro_series",
                FieldType::String,
                "OS series, e.g. jammy",
            ))
            .field(FieldSpec::new(
                "hwe_kernel",
                FieldType::String,
                "Hardware enablement kernel",
            ))
            .field(FieldSpec::new(
                "user_data",
                FieldType::String,
                "Base64-encoded cloud-init user data",
            )),
        handler: Arc::new(DeployMachine),
        long_running: true,
        // The poll loop enforces its own bound; no outer timeout.
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_release_machine",
        description: "Release a machine back to the pool",
        input_schema: InputSchema::new()
            .field(
                FieldSpec::new("system_id", FieldType::String, "Machine system id").required(),
            )
            .field(FieldSpec::new(
                "comment",
                FieldType::String,
                "Reason recorded in the MAAS event log",
            )),
        handler: Arc::new(ReleaseMachine),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_power_on",
        description: "Power a machine on",
        input_schema: InputSchema::new().field(
            FieldSpec::new("system_id", FieldType::String, "Machine system id").required(),
        ),
        handler: Arc::new(PowerMachine { on: true }),
        long_running: false,
        timeout: None,
    })?;
    registry.register(ToolDef {
        name: "maas_power_off",
        description: "Power a machine off",
        input_schema: InputSchema::new().field(
            FieldSpec::new("system_id", FieldType::String, "Machine system id").required(),
        ),
        handler: Arc::new(PowerMachine { on: false }),
        long_running: false,
        timeout: None,
    })?;
    Ok(())
}

struct ListMachines;

#[async_trait]
impl ToolHandler for ListMachines {
    async fn call(&self, ctx: ToolContext, _args: Value) -> GatewayResult<Value> {
        let machines = ctx.maas.list_machines(&ctx.cancel).await?;
        Ok(json!({ "count": machines.len(), "machines": machines }))
    }
}

struct GetMachineDetails;

#[async_trait]
impl ToolHandler for GetMachineDetails {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let system_id = required_str(&args, "system_id")?;
        // Read through the shared resource cache so tool and resource
        // reads of the same machine coalesce.
        let uri = format!("maas://machines/{}", system_id);
        let fingerprint = ResponseCache::fingerprint("Machine", &uri);
        if let Some(hit) = ctx.cache.get(&fingerprint) {
            return Ok(hit.value);
        }
        let machine = ctx.maas.get_machine(system_id, &ctx.cancel).await?;
        let value = json!(machine);
        ctx.cache
            .set(&fingerprint, value.clone(), "Machine", &CacheOptions::default());
        Ok(value)
    }
}

struct AllocateMachine;

#[async_trait]
impl ToolHandler for AllocateMachine {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let params = AllocateParams {
            hostname: optional_str(&args, "hostname"),
            architecture: optional_str(&args, "architecture"),
            min_cpu_count: optional_u64(&args, "cpu_count").map(|v| v as u32),
            min_memory: optional_u64(&args, "memory"),
            tags: string_array(&args, "tags"),
            zone: optional_str(&args, "zone"),
        };
        let machine = ctx.maas.allocate_machine(&params, &ctx.cancel).await?;
        ctx.cache.invalidate_resource_type("Machine");
        ctx.cache.invalidate_resource_type("MachineList");
        Ok(json!(machine))
    }
}

struct ReleaseMachine;

#[async_trait]
impl ToolHandler for ReleaseMachine {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let system_id = required_str(&args, "system_id")?;
        let comment = optional_str(&args, "comment");
        let machine = ctx
            .maas
            .release_machine(system_id, comment.as_deref(), &ctx.cancel)
            .await?;
        ctx.cache.invalidate_resource_type("Machine");
        ctx.cache.invalidate_resource_type("MachineList");
        Ok(json!(machine))
    }
}

struct PowerMachine {
    on: bool,
}

#[async_trait]
impl ToolHandler for PowerMachine {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let system_id = required_str(&args, "system_id")?;
        let machine = if self.on {
            ctx.maas.power_on(system_id, &ctx.cancel).await?
        } else {
            ctx.maas.power_off(system_id, &ctx.cancel).await?
        };
        ctx.cache.invalidate_resource_type("Machine");
        Ok(json!(machine))
    }
}

/// The long-running deploy composition: initiate upstream, poll status,
/// stream progress through the tracker, finalize the operation.
struct DeployMachine;

#[async_trait]
impl ToolHandler for DeployMachine {
    async fn call(&self, ctx: ToolContext, args: Value) -> GatewayResult<Value> {
        let system_id = required_str(&args, "system_id")?;
        let params = DeployParams {
            osystem: optional_str(&args, "osystem"),
            distro_series: optional_str(&args, "distro_series"),
            hwe_kernel: optional_str(&args, "hwe_kernel"),
            user_data: optional_str(&args, "user_data"),
        };

        let operation_id = format!("deploy-{}-{}", system_id, Uuid::new_v4().simple());
        let (reporter, op_token) = ctx.tracker.start_operation(&operation_id)?;

        let result =
            run_deploy(&ctx, &reporter, &op_token, &operation_id, system_id, &params).await;
        // Deployment changes machine state regardless of outcome.
        ctx.cache.invalidate_resource_type("Machine");
        ctx.cache.invalidate_resource_type("MachineList");
        result
    }
}

async fn run_deploy(
    ctx: &ToolContext,
    reporter: &Reporter,
    op_token: &CancellationToken,
    operation_id: &str,
    system_id: &str,
    params: &DeployParams,
) -> GatewayResult<Value> {
    reporter.progress(0, "starting deployment", None)?;

    let initiated = tokio::select! {
        _ = op_token.cancelled() => return cancelled(reporter, op_token, operation_id),
        result = ctx.maas.deploy_machine(system_id, params, &ctx.cancel) => result,
    };
    let machine = match initiated {
        Ok(machine) => machine,
        Err(error) => return upstream_failure(reporter, op_token, operation_id, error),
    };
    reporter.progress(
        10,
        format!("deployment initiated, machine status: {}", machine.status_name),
        None,
    )?;

    for poll in 1..=ctx.settings.deploy_poll_limit {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return cancelled(reporter, op_token, operation_id),
            _ = op_token.cancelled() => return cancelled(reporter, op_token, operation_id),
            _ = tokio::time::sleep(ctx.settings.deploy_poll_interval) => {}
        }

        let polled = tokio::select! {
            _ = op_token.cancelled() => return cancelled(reporter, op_token, operation_id),
            result = ctx.maas.get_machine(system_id, &ctx.cancel) => result,
        };
        let machine = match polled {
            Ok(machine) => machine,
            Err(error) => return upstream_failure(reporter, op_token, operation_id, error),
        };

        let status = machine.status_name.to_uppercase();
        if status == "DEPLOYED" {
            let payload = json!({
                "operation_id": operation_id,
                "machine": machine,
            });
            reporter.complete(payload.clone(), "deployment complete")?;
            return Ok(payload);
        }
        if status.starts_with("FAILED") {
            let message = format!("deployment failed: {}", machine.status_name);
            reporter.fail(
                &message,
                500,
                Some(json!({"status_name": machine.status_name})),
                false,
            )?;
            return Err(GatewayError::Upstream {
                status: 500,
                message,
            });
        }

        let percent = u8::try_from((15 + (u64::from(poll) - 1) * 5).min(70)).unwrap_or(70);
        reporter.progress(
            percent,
            format!("deployment status: {}", machine.status_name),
            None,
        )?;
    }

    reporter.log(
        LogLevel::Warning,
        format!(
            "gave up after {} status polls",
            ctx.settings.deploy_poll_limit
        ),
        "deploy",
        None,
    )?;
    reporter.fail("deployment timed out", 504, None, false)?;
    Err(GatewayError::Timeout(format!(
        "deployment of {} did not finish within {} polls",
        system_id, ctx.settings.deploy_poll_limit
    )))
}

fn cancelled(
    reporter: &Reporter,
    op_token: &CancellationToken,
    operation_id: &str,
) -> GatewayResult<Value> {
    // When the operation's own scope fired (drain timeout or explicit
    // cancel), the tracker records the terminal `cancelled` status; a
    // caller-side cancel is ours to report. Either way the record may
    // already be finalized, so the fail result is dropped.
    if !op_token.is_cancelled() {
        let _ = reporter.fail("deployment cancelled by client", 499, None, false);
    }
    Err(GatewayError::Cancelled(format!(
        "operation {} cancelled",
        operation_id
    )))
}

fn upstream_failure(
    reporter: &Reporter,
    op_token: &CancellationToken,
    operation_id: &str,
    error: mmg_maas_client::MaasError,
) -> GatewayResult<Value> {
    let gateway_error: GatewayError = error.into();
    if matches!(gateway_error, GatewayError::Cancelled(_)) {
        return cancelled(reporter, op_token, operation_id);
    }
    let _ = reporter.fail(
        gateway_error.to_string(),
        i64::from(gateway_error.status_code()),
        None,
        false,
    );
    Err(gateway_error)
}
