//! Scenarios: ordered setup and guaranteed unwind
//!
//! A [`Scenario`] is an ordered list of [`ScenarioComponent`]s, each one a
//! precondition for the test run ("cluster manager running everywhere",
//! "flood pings in progress"). Components are set up in order. If one fails,
//! the components already set up are torn down in reverse order and the
//! failing component itself is left alone. Teardown is best effort: a
//! component that fails to tear down does not stop the others.

mod components;

pub use components::{InitClusterManager, NodeProbe, PingFlood, PingProbe, TruncateLogs};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::cluster_manager::ClusterManager;
use crate::error::{CtsError, CtsResult};
use crate::lab::Lab;

/// One composable precondition of a test run
#[async_trait]
pub trait ScenarioComponent: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this component can be used in the given lab
    fn is_applicable(&self, lab: &Lab) -> bool;

    async fn set_up(&mut self, cm: &mut ClusterManager) -> CtsResult<()>;

    /// Undo [`set_up`](Self::set_up); only called after a successful setup
    async fn tear_down(&mut self, cm: &mut ClusterManager) -> CtsResult<()>;
}

pub struct Scenario {
    components: Vec<Box<dyn ScenarioComponent>>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("components", &self.component_names())
            .finish()
    }
}

impl Scenario {
    /// Build a scenario; an empty component list is a configuration error
    pub fn new(components: Vec<Box<dyn ScenarioComponent>>) -> CtsResult<Self> {
        if components.is_empty() {
            return Err(CtsError::configuration(
                "scenario",
                "a scenario needs at least one component",
            ));
        }
        Ok(Self { components })
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// True iff every component is applicable; stops at the first that is not
    pub fn is_applicable(&self, lab: &Lab) -> bool {
        self.components.iter().all(|c| c.is_applicable(lab))
    }

    /// Set up every component in order
    ///
    /// On the first failure, components `0..index` are torn down in reverse
    /// and [`CtsError::ScenarioSetup`] names the failing component.
    pub async fn set_up(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        for index in 0..self.components.len() {
            let result = self.components[index].set_up(cm).await;
            if let Err(e) = result {
                let name = self.components[index].name().to_string();
                error!(component = %name, index, error = %e, "Scenario setup failed");
                cm.log(&format!("Setup of {} failed: {}", name, e));
                cm.log("Tearing down partial setup");

                if index > 0 {
                    if let Err(teardown) = self.tear_down_to(cm, index - 1).await {
                        warn!(error = %teardown, "Partial teardown reported errors");
                    }
                }
                return Err(CtsError::ScenarioSetup {
                    component: name,
                    index,
                });
            }
            info!(component = %self.components[index].name(), index, "Scenario component set up");
        }
        Ok(())
    }

    /// Tear down every component, last first
    pub async fn tear_down(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        let last = self.components.len() - 1;
        self.tear_down_to(cm, last).await
    }

    /// Tear down components `max` down to 0, continuing past failures
    pub async fn tear_down_to(&mut self, cm: &mut ClusterManager, max: usize) -> CtsResult<()> {
        let max = max.min(self.components.len() - 1);
        let mut errors = Vec::new();

        for index in (0..=max).rev() {
            let component = &mut self.components[index];
            if let Err(e) = component.tear_down(cm).await {
                warn!(component = %component.name(), index, error = %e, "Teardown failed");
                cm.log(&format!("Teardown of {} failed: {}", component.name(), e));
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CtsError::Multiple {
                context: "scenario teardown".to_string(),
                errors,
            })
        }
    }
}
