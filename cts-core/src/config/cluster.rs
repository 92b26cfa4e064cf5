//! Cluster manager configuration
//!
//! A [`ClusterConfig`] describes how to drive one cluster manager: the commands
//! that start, stop, query and reconfigure it, the log file it writes to, the
//! log lines that mark its state transitions and the "bad news" lines that
//! should never appear. It is validated once at construction and is read-only
//! afterwards; the only way to change it is a named override, which yields a
//! new, re-validated value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use crate::error::{CtsError, CtsResult};

/// Placeholder in log patterns that is replaced by the node name
pub const NODE_PLACEHOLDER: &str = "%s";

/// Keys accepted by [`ClusterConfig::with_override`] and `CTS_<KEY>` variables
pub const OVERRIDE_KEYS: &[&str] = &[
    "name",
    "dead_time",
    "start_time",
    "start_cmd",
    "stop_cmd",
    "status_cmd",
    "reread_cmd",
    "status_stopped_marker",
    "log_file",
    "patterns.we_started",
    "patterns.they_started",
    "patterns.we_stopped",
    "patterns.they_stopped",
    "patterns.all_stopped",
    "bad_regexes",
    "harness_marker",
];

/// Named log events a cluster manager is expected to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEvent {
    /// The local cluster manager reports itself active
    WeStarted,
    /// A peer reports the given node active
    TheyStarted,
    /// The local cluster manager finished shutting down
    WeStopped,
    /// A peer declares the given node dead
    TheyStopped,
    /// Every node finished shutting down
    AllStopped,
}

/// Log patterns keyed by event
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogPatterns {
    pub we_started: String,
    pub they_started: String,
    pub we_stopped: String,
    pub they_stopped: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_stopped: Option<String>,
}

/// Validated configuration for one cluster manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster manager name, used in log messages
    pub name: String,

    /// Maximum time for the cluster to notice a dead node
    #[serde(with = "humantime_serde")]
    pub dead_time: Duration,

    /// Maximum time for a cluster manager to come up
    #[serde(with = "humantime_serde")]
    pub start_time: Duration,

    pub start_cmd: String,
    pub stop_cmd: String,
    pub status_cmd: String,
    pub reread_cmd: String,

    /// Substring of the status output that means "not running"
    #[serde(default = "default_stopped_marker")]
    pub status_stopped_marker: String,

    /// Log file the cluster manager writes to (tailed locally)
    pub log_file: PathBuf,

    pub patterns: LogPatterns,

    /// Lines that should never appear in the log
    pub bad_regexes: Vec<String>,

    /// Marker carried by the harness's own log lines
    #[serde(default = "default_harness_marker")]
    pub harness_marker: String,
}

fn default_stopped_marker() -> String {
    DEFAULT_STATUS_STOPPED_MARKER.to_string()
}

fn default_harness_marker() -> String {
    DEFAULT_HARNESS_MARKER.to_string()
}

impl ClusterConfig {
    /// Start building a configuration
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
    }

    /// Parse a complete configuration from TOML and validate it
    pub fn from_toml_str(input: &str) -> CtsResult<Self> {
        let config: ClusterConfig = toml::from_str(input)
            .map_err(|e| CtsError::configuration("cluster", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required option is present and every pattern compiles
    pub fn validate(&self) -> CtsResult<()> {
        let required = [
            ("name", &self.name),
            ("start_cmd", &self.start_cmd),
            ("stop_cmd", &self.stop_cmd),
            ("status_cmd", &self.status_cmd),
            ("reread_cmd", &self.reread_cmd),
            ("status_stopped_marker", &self.status_stopped_marker),
            ("harness_marker", &self.harness_marker),
            ("patterns.we_started", &self.patterns.we_started),
            ("patterns.they_started", &self.patterns.they_started),
            ("patterns.we_stopped", &self.patterns.we_stopped),
            ("patterns.they_stopped", &self.patterns.they_stopped),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(CtsError::configuration(
                    format!("cluster.{}", key),
                    "required option is missing or empty",
                ));
            }
        }

        if self.log_file.as_os_str().is_empty() {
            return Err(CtsError::configuration(
                "cluster.log_file",
                "required option is missing or empty",
            ));
        }
        if self.dead_time.is_zero() {
            return Err(CtsError::configuration("cluster.dead_time", "must be non-zero"));
        }
        if self.start_time.is_zero() {
            return Err(CtsError::configuration("cluster.start_time", "must be non-zero"));
        }
        if self.bad_regexes.is_empty() {
            return Err(CtsError::configuration(
                "cluster.bad_regexes",
                "at least one bad-news pattern is required",
            ));
        }

        for event in [
            LogEvent::WeStarted,
            LogEvent::TheyStarted,
            LogEvent::WeStopped,
            LogEvent::TheyStopped,
            LogEvent::AllStopped,
        ] {
            if let Some(pattern) = self.pattern(event, Some("node")) {
                compile("cluster.patterns", &pattern)?;
            }
        }
        for pattern in &self.bad_regexes {
            compile("cluster.bad_regexes", pattern)?;
        }

        Ok(())
    }

    /// Pattern for a log event with `%s` replaced by the escaped node name
    ///
    /// Returns `None` only for optional events that are not configured.
    pub fn pattern(&self, event: LogEvent, node: Option<&str>) -> Option<String> {
        let template = match event {
            LogEvent::WeStarted => Some(&self.patterns.we_started),
            LogEvent::TheyStarted => Some(&self.patterns.they_started),
            LogEvent::WeStopped => Some(&self.patterns.we_stopped),
            LogEvent::TheyStopped => Some(&self.patterns.they_stopped),
            LogEvent::AllStopped => self.patterns.all_stopped.as_ref(),
        }?;

        Some(match node {
            Some(node) => template.replace(NODE_PLACEHOLDER, &regex::escape(node)),
            None => template.clone(),
        })
    }

    /// Return a copy with one named option replaced, re-validated
    ///
    /// The value is read as a TOML value when it parses as one (so lists and
    /// numbers work) and as a plain string otherwise.
    pub fn with_override(&self, key: &str, value: &str) -> CtsResult<Self> {
        let updated = self.apply_override(key, value)?;
        updated.validate()?;
        Ok(updated)
    }

    fn apply_override(&self, key: &str, value: &str) -> CtsResult<Self> {
        if !OVERRIDE_KEYS.contains(&key) {
            return Err(CtsError::configuration(
                format!("cluster.{}", key),
                format!("unknown option; known options: {}", OVERRIDE_KEYS.join(", ")),
            ));
        }

        let mut table = match toml::Value::try_from(self) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(CtsError::internal("cluster config did not serialize to a table")),
            Err(e) => {
                return Err(CtsError::internal(format!(
                    "Failed to serialize cluster config: {}",
                    e
                )))
            }
        };
        let parsed = parse_override_value(value);

        match key.split_once('.') {
            Some((section, field)) => {
                let nested = table
                    .entry(section.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                match nested {
                    toml::Value::Table(inner) => {
                        inner.insert(field.to_string(), parsed);
                    }
                    _ => {
                        return Err(CtsError::internal(format!(
                            "cluster config section '{}' is not a table",
                            section
                        )))
                    }
                }
            }
            None => {
                table.insert(key.to_string(), parsed);
            }
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| {
                CtsError::configuration(format!("cluster.{}", key), e.to_string())
            })
    }

    /// Apply a batch of named overrides in order
    pub fn with_overrides<'a, I>(&self, overrides: I) -> CtsResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = self.clone();
        for (key, value) in overrides {
            config = config.with_override(key, value)?;
        }
        Ok(config)
    }

    /// Apply `CTS_<KEY>` environment variables (dots become underscores)
    pub fn apply_env_overrides(&self) -> CtsResult<Self> {
        self.with_overrides(
            env_overrides()
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }
}

/// Overrides found in `CTS_<KEY>` environment variables, in key order
pub fn env_overrides() -> Vec<(String, String)> {
    OVERRIDE_KEYS
        .iter()
        .filter_map(|key| {
            let var = env_var_name(key);
            std::env::var(&var).ok().map(|value| {
                tracing::debug!(var = %var, "Cluster config override from environment");
                (key.to_string(), value)
            })
        })
        .collect()
}

/// Environment variable consulted for a named option
pub fn env_var_name(key: &str) -> String {
    format!("CTS_{}", key.replace('.', "_").to_uppercase())
}

fn parse_override_value(value: &str) -> toml::Value {
    let snippet = format!("v = {}", value);
    match toml::from_str::<toml::Table>(&snippet) {
        Ok(mut table) => table
            .remove("v")
            .unwrap_or_else(|| toml::Value::String(value.to_string())),
        Err(_) => toml::Value::String(value.to_string()),
    }
}

fn compile(component: &str, pattern: &str) -> CtsResult<Regex> {
    Regex::new(pattern).map_err(|e| CtsError::invalid_pattern(component, pattern, e))
}

/// Builder for ClusterConfig
///
/// Drivers hand out a partially filled builder with their defaults; callers
/// fill in or replace options and `build()` validates the result.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfigBuilder {
    name: Option<String>,
    dead_time: Option<Duration>,
    start_time: Option<Duration>,
    start_cmd: Option<String>,
    stop_cmd: Option<String>,
    status_cmd: Option<String>,
    reread_cmd: Option<String>,
    status_stopped_marker: Option<String>,
    log_file: Option<PathBuf>,
    patterns: LogPatterns,
    bad_regexes: Vec<String>,
    harness_marker: Option<String>,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn dead_time(mut self, dead_time: Duration) -> Self {
        self.dead_time = Some(dead_time);
        self
    }

    pub fn start_time(mut self, start_time: Duration) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn start_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.start_cmd = Some(cmd.into());
        self
    }

    pub fn stop_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.stop_cmd = Some(cmd.into());
        self
    }

    pub fn status_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.status_cmd = Some(cmd.into());
        self
    }

    pub fn reread_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.reread_cmd = Some(cmd.into());
        self
    }

    pub fn status_stopped_marker(mut self, marker: impl Into<String>) -> Self {
        self.status_stopped_marker = Some(marker.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn pattern(mut self, event: LogEvent, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match event {
            LogEvent::WeStarted => self.patterns.we_started = pattern,
            LogEvent::TheyStarted => self.patterns.they_started = pattern,
            LogEvent::WeStopped => self.patterns.we_stopped = pattern,
            LogEvent::TheyStopped => self.patterns.they_stopped = pattern,
            LogEvent::AllStopped => self.patterns.all_stopped = Some(pattern),
        }
        self
    }

    pub fn bad_regex(mut self, pattern: impl Into<String>) -> Self {
        self.bad_regexes.push(pattern.into());
        self
    }

    pub fn bad_regexes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bad_regexes = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn harness_marker(mut self, marker: impl Into<String>) -> Self {
        self.harness_marker = Some(marker.into());
        self
    }

    pub fn build(self) -> CtsResult<ClusterConfig> {
        let config = self.assemble();
        config.validate()?;
        Ok(config)
    }

    /// Apply named overrides to the builder's values, then validate
    ///
    /// Lets a driver leave options empty for the overrides to fill in.
    pub fn build_with_overrides<I, K, V>(self, overrides: I) -> CtsResult<ClusterConfig>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = self.assemble();
        for (key, value) in overrides {
            config = config.apply_override(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    fn assemble(self) -> ClusterConfig {
        ClusterConfig {
            name: self.name.unwrap_or_default(),
            dead_time: self
                .dead_time
                .unwrap_or(duration_secs(DEFAULT_DEAD_TIME_SECS)),
            start_time: self
                .start_time
                .unwrap_or(duration_secs(DEFAULT_START_TIME_SECS)),
            start_cmd: self.start_cmd.unwrap_or_default(),
            stop_cmd: self.stop_cmd.unwrap_or_default(),
            status_cmd: self.status_cmd.unwrap_or_default(),
            reread_cmd: self.reread_cmd.unwrap_or_default(),
            status_stopped_marker: self
                .status_stopped_marker
                .unwrap_or_else(default_stopped_marker),
            log_file: self.log_file.unwrap_or_default(),
            patterns: self.patterns,
            bad_regexes: self.bad_regexes,
            harness_marker: self.harness_marker.unwrap_or_else(default_harness_marker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClusterConfigBuilder {
        ClusterConfig::builder()
            .name("sample")
            .start_cmd("svc start")
            .stop_cmd("svc stop")
            .status_cmd("svc status")
            .reread_cmd("svc reload")
            .log_file("/var/log/sample.log")
            .pattern(LogEvent::WeStarted, "local active")
            .pattern(LogEvent::TheyStarted, "%s: status active")
            .pattern(LogEvent::WeStopped, "shutdown complete")
            .pattern(LogEvent::TheyStopped, "node %s: is dead")
            .bad_regex(r"Shutting down\.")
    }

    #[test]
    fn test_builder_defaults() {
        let config = sample().build().unwrap();
        assert_eq!(config.dead_time, Duration::from_secs(DEFAULT_DEAD_TIME_SECS));
        assert_eq!(config.status_stopped_marker, "stopped");
        assert_eq!(config.harness_marker, " CTS: ");
    }

    #[test]
    fn test_missing_required_option_is_configuration_error() {
        let err = sample().start_cmd("").build().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("start_cmd"));

        let err = sample().bad_regexes(Vec::<String>::new()).build().unwrap_err();
        assert!(err.to_string().contains("bad_regexes"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = sample().bad_regex("(unclosed").build().unwrap_err();
        assert!(matches!(err, CtsError::InvalidPattern { .. }));
    }

    #[test]
    fn test_pattern_substitutes_escaped_node() {
        let config = sample().build().unwrap();
        assert_eq!(
            config.pattern(LogEvent::TheyStarted, Some("db.1")).unwrap(),
            r"db\.1: status active"
        );
        assert!(config.pattern(LogEvent::AllStopped, Some("n1")).is_none());
    }

    #[test]
    fn test_named_override() {
        let config = sample().build().unwrap();
        let updated = config
            .with_override("stop_cmd", "svc stop --now")
            .unwrap()
            .with_override("dead_time", "\"5s\"")
            .unwrap()
            .with_override("patterns.they_stopped", "%s left")
            .unwrap();
        assert_eq!(updated.stop_cmd, "svc stop --now");
        assert_eq!(updated.dead_time, Duration::from_secs(5));
        assert_eq!(updated.patterns.they_stopped, "%s left");
        // the base config is untouched
        assert_eq!(config.stop_cmd, "svc stop");

        let listed = config
            .with_override("bad_regexes", r#"["panic", "fatal"]"#)
            .unwrap();
        assert_eq!(listed.bad_regexes, vec!["panic", "fatal"]);
    }

    #[test]
    fn test_override_rejects_unknown_key_and_empty_value() {
        let config = sample().build().unwrap();
        assert!(config.with_override("no_such_key", "x").unwrap_err().is_configuration());
        assert!(config.with_override("status_cmd", "\"\"").unwrap_err().is_configuration());
    }

    #[test]
    fn test_overrides_complete_a_partial_builder() {
        let partial = ClusterConfig::builder()
            .name("generic")
            .bad_regex("panic");
        assert!(partial.clone().build().is_err());

        let config = partial
            .build_with_overrides([
                ("start_cmd", "svc start"),
                ("stop_cmd", "svc stop"),
                ("status_cmd", "svc status"),
                ("reread_cmd", "svc reload"),
                ("log_file", "/var/log/messages"),
                ("patterns.we_started", "up"),
                ("patterns.they_started", "%s up"),
                ("patterns.we_stopped", "down"),
                ("patterns.they_stopped", "%s down"),
            ])
            .unwrap();
        assert_eq!(config.reread_cmd, "svc reload");
        assert_eq!(config.log_file, PathBuf::from("/var/log/messages"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("start_cmd"), "CTS_START_CMD");
        assert_eq!(env_var_name("patterns.we_started"), "CTS_PATTERNS_WE_STARTED");
    }

    #[test]
    fn test_toml_round_trip_keeps_durations_readable() {
        let config = sample().dead_time(Duration::from_secs(5)).build().unwrap();
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("dead_time = \"5s\""));
        assert_eq!(ClusterConfig::from_toml_str(&text).unwrap(), config);
    }
}
