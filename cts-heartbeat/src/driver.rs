//! The heartbeat cluster manager driver

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use cts_core::config::{ClusterConfigBuilder, LogEvent};
use cts_core::{
    ClusterManagerDriver, CtsError, CtsResult, RemoteExecutor, ResourceGroup, ResourceSpec,
};

use crate::haresources::{load_haresources, IP_RESOURCE_TYPE};

pub const HEARTBEAT_BINARY: &str = "/usr/lib/heartbeat/heartbeat";
pub const DEFAULT_LOG_FILE: &str = "/var/log/ha-log";
pub const DEFAULT_RESOURCE_FILE: &str = "/etc/ha.d/haresources";
pub const DEFAULT_RESOURCE_DIRS: &[&str] = &["/etc/ha.d/resource.d", "/etc/rc.d/init.d"];
pub const DEFAULT_DEAD_TIME: Duration = Duration::from_secs(5);

/// Output of a resource script's `status` operation for a running resource
const RUNNING_PATTERN: &str = "OK|running";
/// Output of an IP resource's `monitor` operation when the address is served
const MONITOR_PATTERN: &str = "OK";
/// IP resources are monitored from here rather than from the owning node
const MONITOR_HOST: &str = "localhost";

/// Messages heartbeat should never log during a healthy run
pub const BAD_REGEXES: &[&str] = &[
    r"Shutting down\.",
    r"Forcing shutdown\.",
    r"Both machines own .* resources!",
    r"No one owns .* resources!",
    r", exiting\.",
];

/// Driver for the heartbeat cluster manager
///
/// Resource groups come from the local copy of `haresources`, assumed to
/// match the one on the cluster nodes. Resources are probed by running
/// their resource script on the node through the remote executor.
#[derive(Debug, Clone)]
pub struct HeartbeatDriver {
    resource_file: PathBuf,
    resource_dirs: Vec<String>,
}

impl Default for HeartbeatDriver {
    fn default() -> Self {
        Self {
            resource_file: PathBuf::from(DEFAULT_RESOURCE_FILE),
            resource_dirs: DEFAULT_RESOURCE_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl HeartbeatDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resource_file = path.into();
        self
    }

    pub fn with_resource_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn resource_file(&self) -> &PathBuf {
        &self.resource_file
    }

    /// Shell script running `operation` of `resource`'s script
    ///
    /// The first executable script named after the resource type in the
    /// resource directories wins; the script exits 1 if there is none.
    pub fn probe_script(&self, resource: &ResourceSpec, operation: &str) -> String {
        format!(
            "LIST=\"{dirs}\"; T=\"{kind}\"; I=\"{instance}\"; \
             for dir in $LIST; do \
             if [ -f \"$dir/$T\" -a -x \"$dir/$T\" ]; then \"$dir/$T\" $I {operation}; exit 0; fi; \
             done; exit 1",
            dirs = self.resource_dirs.join(" "),
            kind = resource.resource_type,
            instance = resource.instance.as_deref().unwrap_or_default(),
            operation = operation,
        )
    }

    async fn resource_operation(
        &self,
        executor: &dyn RemoteExecutor,
        resource: &ResourceSpec,
        operation: &str,
        pattern: &str,
        node: &str,
    ) -> CtsResult<bool> {
        let script = self.probe_script(resource, operation);
        let line = executor.run_and_capture_line(node, &script).await?;
        let re = Regex::new(pattern)
            .map_err(|e| CtsError::invalid_pattern("heartbeat resource probe", pattern, e))?;
        let matched = re.is_match(&line);
        debug!(resource = %resource, operation, node, output = %line, matched, "Resource probe");
        Ok(matched)
    }
}

#[async_trait]
impl ClusterManagerDriver for HeartbeatDriver {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn description(&self) -> &'static str {
        "Linux-HA heartbeat with haresources resource groups"
    }

    fn default_config(&self) -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
            .name("heartbeat")
            .dead_time(DEFAULT_DEAD_TIME)
            .start_cmd(format!("{} ", HEARTBEAT_BINARY))
            .stop_cmd(format!("{} -k", HEARTBEAT_BINARY))
            .status_cmd(format!("{} -s", HEARTBEAT_BINARY))
            .reread_cmd(format!("{} -r", HEARTBEAT_BINARY))
            .log_file(DEFAULT_LOG_FILE)
            .pattern(LogEvent::WeStarted, "Local status now set to: 'active'")
            .pattern(LogEvent::TheyStarted, "%s: status active")
            .pattern(LogEvent::WeStopped, "Heartbeat shutdown complete")
            .pattern(LogEvent::TheyStopped, "node %s: is dead")
            .pattern(LogEvent::AllStopped, " %s heartbeat.*Heartbeat shutdown complete")
            .bad_regexes(BAD_REGEXES.iter().copied())
    }

    async fn resource_groups(&self) -> CtsResult<Vec<ResourceGroup>> {
        Ok(load_haresources(&self.resource_file).await?)
    }

    async fn resource_running_on(
        &self,
        executor: &dyn RemoteExecutor,
        resource: &ResourceSpec,
        node: &str,
    ) -> CtsResult<bool> {
        self.resource_operation(executor, resource, "status", RUNNING_PATTERN, node)
            .await
    }

    async fn resource_working_correctly(
        &self,
        executor: &dyn RemoteExecutor,
        resource: &ResourceSpec,
        _node: &str,
    ) -> CtsResult<bool> {
        if resource.resource_type == IP_RESOURCE_TYPE {
            return self
                .resource_operation(executor, resource, "monitor", MONITOR_PATTERN, MONITOR_HOST)
                .await;
        }
        info!(resource = %resource, "Faking out");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use pretty_assertions::assert_eq;

    /// Answers every capture with a fixed line and remembers the scripts
    struct CannedExecutor {
        line: String,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl CannedExecutor {
        fn new(line: &str) -> Self {
            Self {
                line: line.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for CannedExecutor {
        async fn run(&self, _node: &str, _command: &str) -> CtsResult<i32> {
            Ok(0)
        }

        async fn run_and_capture_line(&self, node: &str, command: &str) -> CtsResult<String> {
            self.seen.lock().unwrap().push((node.to_string(), command.to_string()));
            Ok(self.line.clone())
        }
    }

    #[test]
    fn test_default_config_is_complete() {
        let config = HeartbeatDriver::new().default_config().build().unwrap();
        assert_eq!(config.name, "heartbeat");
        assert_eq!(config.dead_time, Duration::from_secs(5));
        assert_eq!(config.stop_cmd, "/usr/lib/heartbeat/heartbeat -k");
        assert_eq!(config.bad_regexes.len(), 5);
        assert_eq!(
            config.pattern(LogEvent::TheyStarted, Some("node1")).as_deref(),
            Some("node1: status active")
        );
        assert!(config.pattern(LogEvent::AllStopped, Some("a.b")).unwrap().contains(r"a\.b"));
    }

    #[test]
    fn test_probe_script() {
        let driver = HeartbeatDriver::new();
        let script = driver.probe_script(
            &ResourceSpec::new("IPaddr", Some("10.0.0.50".to_string())),
            "status",
        );
        assert!(script.starts_with("LIST=\"/etc/ha.d/resource.d /etc/rc.d/init.d\";"));
        assert!(script.contains("T=\"IPaddr\"; I=\"10.0.0.50\";"));
        assert!(script.contains("\"$dir/$T\" $I status; exit 0"));
        assert!(script.ends_with("exit 1"));

        let bare = driver.probe_script(&ResourceSpec::new("httpd", None), "status");
        assert!(bare.contains("I=\"\";"));
    }

    #[tokio::test]
    async fn test_running_on_matches_status_output() {
        let driver = HeartbeatDriver::new();
        let httpd = ResourceSpec::new("httpd", None);

        let running = CannedExecutor::new("httpd (pid 42) is running...");
        assert!(driver.resource_running_on(&running, &httpd, "n1").await.unwrap());
        assert_eq!(running.seen.lock().unwrap()[0].0, "n1");

        let stopped = CannedExecutor::new("httpd is stopped");
        assert!(!driver.resource_running_on(&stopped, &httpd, "n1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ip_resources_are_monitored_locally() {
        let driver = HeartbeatDriver::new();
        let ip = ResourceSpec::new("IPaddr", Some("10.0.0.50".to_string()));
        let executor = CannedExecutor::new("OK");

        assert!(driver
            .resource_working_correctly(&executor, &ip, "n2")
            .await
            .unwrap());
        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen[0].0, "localhost");
        assert!(seen[0].1.contains("$I monitor"));
    }

    #[tokio::test]
    async fn test_other_resources_are_assumed_working() {
        let driver = HeartbeatDriver::new();
        let executor = CannedExecutor::new("garbage");
        assert!(driver
            .resource_working_correctly(&executor, &ResourceSpec::new("httpd", None), "n1")
            .await
            .unwrap());
        assert!(executor.seen.lock().unwrap().is_empty());
    }
}
