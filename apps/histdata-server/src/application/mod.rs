//! Application Layer - Handler registry and the handlers it serves.
//!
//! This layer wires the domain and storage into the protocol-facing
//! dispatch tables. Registration happens exactly once, at server start.

use std::sync::Arc;

use crate::infrastructure::storage::StorageGateway;

/// Dispatch tables for resources and tools.
pub mod registry;

/// The historical-data resource.
pub mod histdata;

/// Named tool handlers.
pub mod tools;

/// Populate a fresh registry with every resource and tool this server
/// exposes. One registry serves every session.
///
/// # Errors
///
/// Propagates duplicate-registration errors (which would indicate a wiring
/// bug, since this runs once).
pub fn build_registry(
    gateway: &Arc<StorageGateway>,
) -> Result<registry::HandlerRegistry, registry::RegistryError> {
    let mut reg = registry::HandlerRegistry::new();
    histdata::register(&mut reg, Arc::clone(gateway))?;
    tools::register(&mut reg)?;
    Ok(reg)
}
