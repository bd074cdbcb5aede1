//! Tool and resource dispatch.
//!
//! Registries are built once at boot and read-only afterwards. Tool
//! execution validates inputs against the declared schema, derives a
//! first-to-fire timeout scope, and renders a uniform result envelope.
//! Resource reads run through the shared response cache.

mod resources;
mod tools;

pub use resources::{
    CacheHeaders, CachePolicy, CacheStatus, ResourceContext, ResourceDef, ResourceHandler,
    ResourceRegistry, ResourceResponse,
};
pub use tools::{ToolContext, ToolDef, ToolHandler, ToolRegistry, ToolSettings};
