//! Lab file configuration
//!
//! A lab file is a TOML document describing the machines under test and how
//! the harness should reach, reset and exercise them:
//!
//! ```toml
//! nodes = ["alpha", "beta"]
//! driver = "heartbeat"
//! iterations = 200
//! seed = 42
//!
//! [remote]
//! program = "/usr/bin/ssh"
//!
//! [reset]
//! kind = "stonith"
//!
//! [scenario]
//! components = ["truncate-logs", "init"]
//!
//! [cluster]
//! dead_time = "20s"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults::*;
use crate::error::{CtsError, CtsResult};

/// Top-level lab configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Node names; every name must resolve
    pub nodes: Vec<String>,

    /// Explicit run seed; drawn from the OS when absent
    pub seed: Option<u64>,

    /// Registered cluster manager driver
    pub driver: String,

    /// Number of fault-injection iterations
    pub iterations: u64,

    pub remote: RemoteSettings,
    pub reset: ResetSettings,
    pub logging: LoggingSettings,
    pub scenario: ScenarioSettings,

    /// Enabled tests by name; all applicable tests when absent
    pub tests: Option<Vec<String>>,

    /// Enabled audits by name; all audits when absent
    pub audits: Option<Vec<String>>,

    /// Allow tests that power-cycle nodes
    pub reset_tests: bool,

    /// Named overrides applied on top of the driver's cluster defaults
    pub cluster: BTreeMap<String, toml::Value>,
}

/// How remote commands are issued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub program: String,
    pub args: Vec<String>,
    pub attempts: u32,
}

/// Which reset mechanism to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetKind {
    None,
    Stonith,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetSettings {
    pub kind: ResetKind,
    pub path: PathBuf,
    pub device_type: String,
    pub params: String,
}

/// Where harness log lines go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Forward harness lines into `tracing`
    pub tracing: bool,
    /// Write harness lines to stderr
    pub stderr: bool,
    /// Append harness lines to a file, usually the cluster log itself
    pub file: Option<PathBuf>,
    pub source_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    /// Component names in setup order
    pub components: Vec<String>,

    /// Payload size for flood pings
    pub ping_size: u32,

    #[serde(with = "humantime_serde")]
    pub boot_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub watch_poll_interval: Duration,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            seed: None,
            driver: "heartbeat".to_string(),
            iterations: DEFAULT_ITERATIONS,
            remote: RemoteSettings::default(),
            reset: ResetSettings::default(),
            logging: LoggingSettings::default(),
            scenario: ScenarioSettings::default(),
            tests: None,
            audits: None,
            reset_tests: false,
            cluster: BTreeMap::new(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_REMOTE_PROGRAM.to_string(),
            args: DEFAULT_REMOTE_ARGS.iter().map(|s| s.to_string()).collect(),
            attempts: DEFAULT_REMOTE_ATTEMPTS,
        }
    }
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            kind: ResetKind::None,
            path: PathBuf::from(DEFAULT_STONITH_PATH),
            device_type: DEFAULT_STONITH_TYPE.to_string(),
            params: DEFAULT_STONITH_PARAMS.to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            tracing: true,
            stderr: false,
            file: None,
            source_tag: DEFAULT_LOG_SOURCE_TAG.to_string(),
        }
    }
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            components: vec!["init".to_string()],
            ping_size: DEFAULT_PING_SIZE,
            boot_timeout: duration_secs(DEFAULT_BOOT_TIMEOUT_SECS),
            watch_poll_interval: duration_ms(DEFAULT_WATCH_POLL_INTERVAL_MS),
        }
    }
}

impl LabConfig {
    /// Load and validate a lab file
    pub fn from_file(path: &Path) -> CtsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CtsError::configuration(
                "lab",
                format!("Failed to read lab file {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(input: &str) -> CtsResult<Self> {
        let config: LabConfig =
            toml::from_str(input).map_err(|e| CtsError::configuration("lab", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CtsResult<()> {
        if self.nodes.len() < MIN_LAB_NODES {
            return Err(CtsError::configuration(
                "lab.nodes",
                format!(
                    "at least {} nodes are required, got {}",
                    MIN_LAB_NODES,
                    self.nodes.len()
                ),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.trim().is_empty() {
                return Err(CtsError::configuration("lab.nodes", "empty node name"));
            }
            if !seen.insert(node.as_str()) {
                return Err(CtsError::configuration(
                    "lab.nodes",
                    format!("node '{}' listed twice", node),
                ));
            }
        }

        if self.driver.trim().is_empty() {
            return Err(CtsError::configuration("lab.driver", "must not be empty"));
        }
        if self.iterations == 0 {
            return Err(CtsError::configuration("lab.iterations", "must be positive"));
        }
        if self.remote.attempts == 0 {
            return Err(CtsError::configuration("lab.remote.attempts", "must be positive"));
        }
        if self.remote.program.trim().is_empty() {
            return Err(CtsError::configuration("lab.remote.program", "must not be empty"));
        }
        if !self.logging.tracing && !self.logging.stderr && self.logging.file.is_none() {
            return Err(CtsError::configuration(
                "lab.logging",
                "at least one log sink must be enabled",
            ));
        }
        if self.scenario.components.is_empty() {
            return Err(CtsError::configuration(
                "lab.scenario.components",
                "a scenario needs at least one component",
            ));
        }
        if self.scenario.watch_poll_interval.is_zero() {
            return Err(CtsError::configuration(
                "lab.scenario.watch_poll_interval",
                "must be non-zero",
            ));
        }

        Ok(())
    }

    /// Cluster overrides flattened to `(key, toml-value)` pairs
    ///
    /// Nested tables such as `[cluster.patterns]` become dotted keys.
    pub fn cluster_overrides(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (key, value) in &self.cluster {
            match value {
                toml::Value::Table(inner) => {
                    for (field, v) in inner {
                        out.push((format!("{}.{}", key, field), v.to_string()));
                    }
                }
                other => out.push((key.clone(), other.to_string())),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_lab_uses_defaults() {
        let lab = LabConfig::from_toml_str(r#"nodes = ["a", "b"]"#).unwrap();
        assert_eq!(lab.driver, "heartbeat");
        assert_eq!(lab.iterations, DEFAULT_ITERATIONS);
        assert_eq!(lab.remote.attempts, 3);
        assert_eq!(lab.reset.kind, ResetKind::None);
        assert_eq!(lab.scenario.components, vec!["init"]);
        assert_eq!(lab.scenario.ping_size, 1024);
    }

    #[test]
    fn test_too_few_nodes() {
        let err = LabConfig::from_toml_str(r#"nodes = ["only"]"#).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("at least 2 nodes"));
    }

    #[test]
    fn test_duplicate_nodes() {
        let err = LabConfig::from_toml_str(r#"nodes = ["a", "a"]"#).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_no_sinks_rejected() {
        let err = LabConfig::from_toml_str(
            r#"
            nodes = ["a", "b"]
            [logging]
            tracing = false
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("log sink"));
    }

    #[test]
    fn test_full_lab_file() {
        let lab = LabConfig::from_toml_str(
            r#"
            nodes = ["alpha", "beta", "gamma"]
            seed = 7
            driver = "generic"
            iterations = 12
            tests = ["start", "stop"]
            reset_tests = true

            [reset]
            kind = "stonith"
            device_type = "apcmaster"

            [scenario]
            components = ["truncate-logs", "init", "ping-flood"]
            boot_timeout = "2m"
            ping_size = 512

            [cluster]
            dead_time = "20s"
            stop_cmd = "svc stop"

            [cluster.patterns]
            they_started = "%s up"
            "#,
        )
        .unwrap();

        assert_eq!(lab.seed, Some(7));
        assert_eq!(lab.reset.kind, ResetKind::Stonith);
        assert_eq!(lab.reset.device_type, "apcmaster");
        assert_eq!(lab.scenario.boot_timeout, Duration::from_secs(120));
        assert_eq!(lab.tests.as_deref(), Some(&["start".to_string(), "stop".to_string()][..]));

        let overrides = lab.cluster_overrides();
        assert!(overrides.contains(&("dead_time".to_string(), "\"20s\"".to_string())));
        assert!(overrides.contains(&("stop_cmd".to_string(), "\"svc stop\"".to_string())));
        assert!(overrides.contains(&("patterns.they_started".to_string(), "\"%s up\"".to_string())));
    }
}
