//! Randomized fault-injection testing for high-availability clusters
//!
//! The harness brings a cluster into a known state through a [`Scenario`],
//! then repeatedly injects a randomly chosen fault, watches the cluster log
//! for trouble and audits the cluster, collecting [`RunStatistics`].

pub mod audits;
pub mod cluster_manager;
pub mod config;
pub mod driver;
pub mod error;
pub mod fault_loop;
pub mod faults;
pub mod lab;
pub mod log_watcher;
pub mod logging;
pub mod remote;
pub mod reset;
pub mod resource;
pub mod scenario;
pub mod stats;
pub mod tracker;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use audits::{standard_audits, Audit};
pub use cluster_manager::ClusterManager;
pub use config::{ClusterConfig, LabConfig, LogEvent};
pub use driver::{ClusterManagerDriver, DriverRegistry, GenericDriver};
pub use error::{CtsError, CtsResult};
pub use fault_loop::{BadNewsPolicy, FaultInjectionLoop};
pub use faults::{standard_tests, FaultTest, TestTarget};
pub use lab::{Lab, LabSettings, Node};
pub use log_watcher::LogWatcher;
pub use remote::{RemoteExecutor, SshExecutor};
pub use resource::{ResourceGroup, ResourceSpec};
pub use scenario::{Scenario, ScenarioComponent};
pub use stats::{Outcome, OutcomeCounts, RunStatistics};
pub use tracker::{NodeStatus, NodeStatusTracker};
