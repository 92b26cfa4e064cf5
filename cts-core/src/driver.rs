//! Cluster manager drivers
//!
//! A driver captures everything that is specific to one cluster manager: its
//! default commands and log patterns, its notion of quorum and how its
//! resources are discovered and probed. Drivers register into a
//! [`DriverRegistry`]; the lab file selects one by name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ClusterConfigBuilder;
use crate::error::{CtsError, CtsResult};
use crate::remote::RemoteExecutor;
use crate::resource::{ResourceGroup, ResourceSpec};
use crate::tracker::NodeStatusTracker;

#[async_trait]
pub trait ClusterManagerDriver: Send + Sync {
    /// Name used to select this driver in a lab file
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Defaults for this cluster manager; overrides are applied on top
    fn default_config(&self) -> ClusterConfigBuilder;

    /// Whether the cluster currently has quorum
    fn has_quorum(&self, tracker: &NodeStatusTracker) -> bool {
        tracker.quorum_count() >= 1
    }

    /// Resource groups defined for this cluster
    async fn resource_groups(&self) -> CtsResult<Vec<ResourceGroup>> {
        Ok(Vec::new())
    }

    /// Whether `resource` currently runs on `node`
    async fn resource_running_on(
        &self,
        _executor: &dyn RemoteExecutor,
        resource: &ResourceSpec,
        _node: &str,
    ) -> CtsResult<bool> {
        Err(CtsError::NotApplicable {
            what: format!("{} does not probe resource {}", self.name(), resource),
        })
    }

    /// Whether `resource` is actually being served correctly from `node`
    async fn resource_working_correctly(
        &self,
        _executor: &dyn RemoteExecutor,
        _resource: &ResourceSpec,
        _node: &str,
    ) -> CtsResult<bool> {
        Ok(true)
    }
}

/// Registry of cluster manager drivers
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ClusterManagerDriver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn ClusterManagerDriver>) {
        let name = driver.name().to_string();
        tracing::debug!("Registering cluster manager driver: {} ({})", name, driver.description());
        self.drivers.insert(name, driver);
    }

    pub fn get(&self, name: &str) -> CtsResult<Arc<dyn ClusterManagerDriver>> {
        self.drivers.get(name).cloned().ok_or_else(|| {
            CtsError::configuration(
                "lab.driver",
                format!(
                    "Unknown cluster manager driver: '{}'. Available drivers: {:?}",
                    name,
                    self.list_available_drivers()
                ),
            )
        })
    }

    /// Registered driver names, sorted
    pub fn list_available_drivers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// `(name, description)` for every registered driver, sorted by name
    pub fn get_driver_info(&self) -> Vec<(String, String)> {
        let mut info: Vec<(String, String)> = self
            .drivers
            .values()
            .map(|d| (d.name().to_string(), d.description().to_string()))
            .collect();
        info.sort();
        info
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(GenericDriver));

        // Cluster-manager-specific drivers live in their own crates and are
        // registered by the binary.

        registry
    }
}

/// Driver with no built-in knowledge of any cluster manager
///
/// Every command and pattern comes from overrides; there are no resources.
#[derive(Debug, Clone, Default)]
pub struct GenericDriver;

#[async_trait]
impl ClusterManagerDriver for GenericDriver {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn description(&self) -> &'static str {
        "Any cluster manager, configured entirely through overrides"
    }

    fn default_config(&self) -> ClusterConfigBuilder {
        ClusterConfigBuilder::new().name("generic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let mut registry = DriverRegistry::new();
        assert!(registry.list_available_drivers().is_empty());

        registry.register(Arc::new(GenericDriver));
        assert_eq!(registry.list_available_drivers(), vec!["generic"]);

        let default_registry = DriverRegistry::default();
        assert!(default_registry.list_available_drivers().contains(&"generic"));
    }

    #[test]
    fn test_unknown_driver_error() {
        let registry = DriverRegistry::default();
        let err = registry.get("pacemaker").err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Unknown cluster manager driver"));
    }

    #[test]
    fn test_generic_needs_overrides() {
        let builder = GenericDriver.default_config();
        assert!(builder.build().unwrap_err().is_configuration());
    }
}
