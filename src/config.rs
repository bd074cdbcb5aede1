//! Gateway configuration, loaded from CLI flags with environment fallbacks.

use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use mmg_progress::TrackerConfig;

/// Cache eviction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheStrategyKind {
    #[value(name = "time-based")]
    TimeBased,
    #[value(name = "lru")]
    Lru,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "maas-mcp-gateway",
    about = "MCP gateway fronting the MAAS bare-metal provisioning API",
    version
)]
pub struct GatewayConfig {
    /// Port for the MCP HTTP endpoint.
    #[arg(long, env = "MCP_PORT", default_value_t = 3002)]
    pub port: u16,

    /// MAAS region endpoint, e.g. `http://maas.example:5240/MAAS`.
    #[arg(long, env = "MAAS_API_URL")]
    pub maas_api_url: String,

    /// MAAS API key in `consumer:token:secret` form.
    #[arg(long, env = "MAAS_API_KEY")]
    pub maas_api_key: String,

    #[arg(long, env = "CACHE_ENABLED", default_value = "true", action = ArgAction::Set)]
    pub cache_enabled: bool,

    #[arg(long, env = "CACHE_STRATEGY", value_enum, default_value = "time-based")]
    pub cache_strategy: CacheStrategyKind,

    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 1000)]
    pub cache_max_size: usize,

    /// Default cache TTL in seconds.
    #[arg(long, env = "CACHE_MAX_AGE", default_value_t = 300)]
    pub cache_max_age: u64,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = "DISCONNECT_TIMEOUT_MS", default_value_t = 30_000)]
    pub disconnect_timeout_ms: u64,

    /// Capacity of the fan-out channel, subscription channels and the
    /// per-operation replay ring.
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value_t = 100)]
    pub event_buffer_size: usize,

    /// Per-call timeout for upstream MAAS requests, in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Interval between deployment status polls, in milliseconds.
    #[arg(long, env = "DEPLOY_POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub deploy_poll_interval_ms: u64,

    /// Maximum number of deployment status polls before giving up.
    #[arg(long, env = "DEPLOY_POLL_LIMIT", default_value_t = 60)]
    pub deploy_poll_limit: u32,
}

impl GatewayConfig {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            event_buffer_size: self.event_buffer_size.max(1),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
        }
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_max_age)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }

    pub fn deploy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deploy_poll_interval_ms.max(1))
    }
}
