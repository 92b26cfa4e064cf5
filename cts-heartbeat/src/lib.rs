pub mod driver;
pub mod haresources;

pub use driver::HeartbeatDriver;
pub use haresources::{load_haresources, parse_haresources, parse_resource, HaresourcesError};

// Re-export core types for convenience
pub use cts_core::{
    driver::{ClusterManagerDriver, DriverRegistry},
    error::{CtsError, CtsResult},
};

use std::sync::Arc;

/// Add the heartbeat driver to `registry`
pub fn register(registry: &mut DriverRegistry) {
    registry.register(Arc::new(HeartbeatDriver::default()));
}
