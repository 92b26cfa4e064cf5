//! Configuration for the cluster test system
//!
//! Two layers:
//! - [`ClusterConfig`]: how to drive one cluster manager (commands, log
//!   patterns, bad-news regexes). Drivers supply defaults; lab files and the
//!   environment supply named overrides.
//! - [`LabConfig`]: the lab file, describing nodes, remote access, reset,
//!   logging and the scenario to run.

pub mod cluster;
pub mod defaults;
pub mod lab;

pub use cluster::{
    env_overrides, env_var_name, ClusterConfig, ClusterConfigBuilder, LogEvent, LogPatterns, NODE_PLACEHOLDER,
    OVERRIDE_KEYS,
};
pub use lab::{LabConfig, LoggingSettings, RemoteSettings, ResetKind, ResetSettings, ScenarioSettings};
