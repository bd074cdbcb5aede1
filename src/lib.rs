//! MCP gateway fronting the MAAS bare-metal provisioning API.
//!
//! Clients speak JSON-RPC 2.0 to `/mcp`: tools are imperative actions
//! (allocate, deploy, tag), resources are URI-addressed state snapshots
//! (`maas://machines/{system_id}`). Long-running tools stream progress
//! through the tracker in [`mmg_progress`]; resource reads share a
//! pluggable response cache.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod schema;
pub mod server;
pub mod tools;

pub use config::{CacheStrategyKind, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use server::{build_router, AppState, SharedState};
