//! URI-addressed MAAS state snapshots exposed over `resources/read`.

pub mod machines;
pub mod subnets;
pub mod tags;

use crate::{dispatch::ResourceRegistry, error::GatewayResult};

/// Register every resource. Called once at boot.
pub fn register_all(registry: &mut ResourceRegistry) -> GatewayResult<()> {
    machines::register(registry)?;
    subnets::register(registry)?;
    tags::register(registry)?;
    Ok(())
}
