//! Test doubles for the harness
//!
//! [`FakeCluster`] stands in for a real lab: it is a remote executor and a
//! reset mechanism at once, keeps per-node running state, writes the log
//! lines a cluster manager would write into a temporary log file, and can be
//! told to fail individual operations. Everything else here is a small
//! scripted stand-in for one trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audits::Audit;
use crate::cluster_manager::ClusterManager;
use crate::config::{ClusterConfig, LogEvent};
use crate::driver::{ClusterManagerDriver, GenericDriver};
use crate::error::{CtsError, CtsResult};
use crate::faults::{FaultTest, TestTarget};
use crate::lab::{Lab, LabSettings, Node};
use crate::logging::LogSink;
use crate::remote::RemoteExecutor;
use crate::reset::ResetMechanism;
use crate::resource::{ResourceGroup, ResourceSpec};
use crate::scenario::{NodeProbe, ScenarioComponent};

pub const FAKE_START_CMD: &str = "fake-cm start";
pub const FAKE_STOP_CMD: &str = "fake-cm stop";
pub const FAKE_STATUS_CMD: &str = "fake-cm status";
pub const FAKE_REREAD_CMD: &str = "fake-cm reload";

/// Captures every line it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any recorded line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(needle)).count()
    }
}

impl LogSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn emit(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[derive(Debug, Default)]
struct FakeState {
    running: HashMap<String, bool>,
    commands: Vec<(String, String)>,
    fail_next: HashSet<(String, String)>,
    quiet: bool,
}

#[derive(Debug)]
struct FakeInner {
    _dir: tempfile::TempDir,
    log_path: PathBuf,
    nodes: Vec<String>,
    config: ClusterConfig,
    sink: Arc<RecordingSink>,
    state: Mutex<FakeState>,
}

/// A scripted cluster of nodes running a fake cluster manager
///
/// Clones share state, so a clone handed to the harness as executor can be
/// inspected through the original.
#[derive(Debug, Clone)]
pub struct FakeCluster {
    inner: Arc<FakeInner>,
}

impl FakeCluster {
    pub fn new(nodes: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let log_path = dir.path().join("cluster.log");
        std::fs::File::create(&log_path).expect("create cluster log");

        let config = ClusterConfig::builder()
            .name("fake-cm")
            .dead_time(Duration::from_millis(300))
            .start_time(Duration::from_millis(300))
            .start_cmd(FAKE_START_CMD)
            .stop_cmd(FAKE_STOP_CMD)
            .status_cmd(FAKE_STATUS_CMD)
            .reread_cmd(FAKE_REREAD_CMD)
            .log_file(&log_path)
            .pattern(LogEvent::WeStarted, "Local status now active")
            .pattern(LogEvent::TheyStarted, "node %s: status active")
            .pattern(LogEvent::WeStopped, "shutdown complete")
            .pattern(LogEvent::TheyStopped, "node %s: is dead")
            .bad_regexes([r"Shutting down\.", r"Forcing shutdown\.", r", exiting\."])
            .build()
            .expect("fake cluster config");

        let state = FakeState {
            running: nodes.iter().map(|n| (n.to_string(), false)).collect(),
            ..FakeState::default()
        };

        Self {
            inner: Arc::new(FakeInner {
                _dir: dir,
                log_path,
                nodes: nodes.iter().map(|n| n.to_string()).collect(),
                config,
                sink: Arc::new(RecordingSink::new()),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    pub fn node_names(&self) -> Vec<String> {
        self.inner.nodes.clone()
    }

    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// The sink every lab built from this cluster logs into
    pub fn sink(&self) -> Arc<RecordingSink> {
        self.inner.sink.clone()
    }

    /// Make the next `op` on `node` fail
    pub fn fail_next(&self, node: &str, op: &str) {
        self.inner
            .state
            .lock()
            .fail_next
            .insert((node.to_string(), op.to_string()));
    }

    pub fn set_running(&self, node: &str, running: bool) {
        self.inner.state.lock().running.insert(node.to_string(), running);
    }

    pub fn is_running(&self, node: &str) -> bool {
        self.inner
            .state
            .lock()
            .running
            .get(node)
            .copied()
            .unwrap_or(false)
    }

    /// Stop writing cluster manager log lines
    pub fn set_quiet(&self, quiet: bool) {
        self.inner.state.lock().quiet = quiet;
    }

    pub fn clear_commands(&self) {
        self.inner.state.lock().commands.clear();
    }

    /// Operations issued against `node`, oldest first
    pub fn commands_for(&self, node: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .commands
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, op)| op.clone())
            .collect()
    }

    pub fn append_log(&self, line: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.inner.log_path)
            .expect("open cluster log");
        writeln!(file, "{}", line).expect("append to cluster log");
    }

    /// A lab over this cluster's nodes on loopback addresses
    pub async fn lab(&self, seed: u64) -> Lab {
        let mut builder = Lab::builder()
            .sink(self.sink())
            .reset(Arc::new(self.clone()))
            .seed(seed)
            .settings(LabSettings {
                reset_tests_enabled: true,
                boot_timeout: Duration::from_secs(1),
                watch_poll_interval: Duration::from_millis(10),
                ..LabSettings::default()
            });
        for (i, node) in self.inner.nodes.iter().enumerate() {
            builder = builder.node_with_address(
                node.clone(),
                IpAddr::V4(Ipv4Addr::new(127, 0, 0, (i + 1) as u8)),
            );
        }
        builder.build().await.expect("fake lab")
    }

    pub async fn cluster_manager(&self, seed: u64) -> ClusterManager {
        self.cluster_manager_with_driver(seed, Arc::new(GenericDriver)).await
    }

    pub async fn cluster_manager_with_driver(
        &self,
        seed: u64,
        driver: Arc<dyn ClusterManagerDriver>,
    ) -> ClusterManager {
        let lab = self.lab(seed).await;
        ClusterManager::new(
            Arc::new(lab),
            driver,
            self.inner.config.clone(),
            Arc::new(self.clone()),
        )
    }

    fn op_for(command: &str) -> &str {
        match command {
            FAKE_START_CMD => "start",
            FAKE_STOP_CMD => "stop",
            FAKE_STATUS_CMD => "status",
            FAKE_REREAD_CMD => "reread",
            other => other,
        }
    }

    /// Record `op` on `node`; false if it was scripted to fail
    fn issue(&self, node: &str, op: &str) -> bool {
        let mut state = self.inner.state.lock();
        state.commands.push((node.to_string(), op.to_string()));
        !state.fail_next.remove(&(node.to_string(), op.to_string()))
    }

    fn write_lines(&self, lines: &[String]) {
        if self.inner.state.lock().quiet {
            return;
        }
        for line in lines {
            self.append_log(line);
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn run(&self, node: &str, command: &str) -> CtsResult<i32> {
        let op = Self::op_for(command);
        if !self.issue(node, op) {
            return Ok(1);
        }
        match op {
            "start" => {
                self.set_running(node, true);
                self.write_lines(&[
                    format!("{} fake-cm: Local status now active", node),
                    format!("{} fake-cm: node {}: status active", node, node),
                ]);
                Ok(0)
            }
            "stop" => {
                self.set_running(node, false);
                self.write_lines(&[
                    format!("{} fake-cm: shutdown complete", node),
                    format!("{} fake-cm: node {}: is dead", node, node),
                ]);
                Ok(0)
            }
            "status" => Ok(if self.is_running(node) { 0 } else { 3 }),
            _ => Ok(0),
        }
    }

    async fn run_and_capture_line(&self, node: &str, command: &str) -> CtsResult<String> {
        let op = Self::op_for(command);
        if !self.issue(node, op) {
            return Err(CtsError::remote(node, command, "scripted failure"));
        }
        if op == "status" {
            let state = if self.is_running(node) { "running" } else { "stopped" };
            Ok(format!("fake-cm is {}", state))
        } else {
            Ok(String::new())
        }
    }
}

#[async_trait]
impl ResetMechanism for FakeCluster {
    fn name(&self) -> &str {
        "fake-reset"
    }

    async fn reset(&self, node: &str) -> CtsResult<bool> {
        if !self.issue(node, "reset") {
            return Ok(false);
        }
        self.set_running(node, false);
        self.write_lines(&[format!("peer fake-cm: node {}: is dead", node)]);
        Ok(true)
    }
}

/// A reset mechanism with a fixed answer
#[derive(Debug)]
pub struct FixedReset {
    available: bool,
    result: bool,
    calls: Mutex<Vec<String>>,
}

impl FixedReset {
    pub fn new(result: bool) -> Self {
        Self {
            available: true,
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(false)
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResetMechanism for FixedReset {
    fn name(&self) -> &str {
        "fixed"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn reset(&self, node: &str) -> CtsResult<bool> {
        self.calls.lock().push(node.to_string());
        Ok(self.result)
    }
}

/// Every node answers immediately
#[derive(Debug, Default)]
pub struct AlwaysReachable;

#[async_trait]
impl NodeProbe for AlwaysReachable {
    async fn is_reachable(&self, _node: &Node) -> bool {
        true
    }
}

/// Shared record of scenario setup and teardown calls
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Scenario component that journals its calls and fails on request
#[derive(Debug)]
pub struct ScriptedComponent {
    name: String,
    journal: Journal,
    fail_set_up: bool,
    fail_tear_down: bool,
    applicable: bool,
}

impl ScriptedComponent {
    pub fn new(name: impl Into<String>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            journal,
            fail_set_up: false,
            fail_tear_down: false,
            applicable: true,
        }
    }

    pub fn failing_set_up(mut self) -> Self {
        self.fail_set_up = true;
        self
    }

    pub fn failing_tear_down(mut self) -> Self {
        self.fail_tear_down = true;
        self
    }

    pub fn not_applicable(mut self) -> Self {
        self.applicable = false;
        self
    }
}

#[async_trait]
impl ScenarioComponent for ScriptedComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, _lab: &Lab) -> bool {
        self.applicable
    }

    async fn set_up(&mut self, _cm: &mut ClusterManager) -> CtsResult<()> {
        self.journal.push(format!("setup {}", self.name));
        if self.fail_set_up {
            return Err(CtsError::internal(format!("{} refused to set up", self.name)));
        }
        Ok(())
    }

    async fn tear_down(&mut self, _cm: &mut ClusterManager) -> CtsResult<()> {
        self.journal.push(format!("teardown {}", self.name));
        if self.fail_tear_down {
            return Err(CtsError::internal(format!("{} refused to tear down", self.name)));
        }
        Ok(())
    }
}

/// Cluster-level test with a fixed outcome
pub struct ScriptedTest {
    name: String,
    passes: bool,
    applicable: bool,
    noise: Option<(FakeCluster, String, usize)>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTest {
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: true,
            applicable: true,
            noise: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            passes: false,
            ..Self::passing(name)
        }
    }

    pub fn not_applicable(mut self) -> Self {
        self.applicable = false;
        self
    }

    /// Append `line` to the cluster log `count` times on every invocation
    pub fn logging(mut self, cluster: &FakeCluster, line: &str, count: usize) -> Self {
        self.noise = Some((cluster.clone(), line.to_string(), count));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl FaultTest for ScriptedTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> TestTarget {
        TestTarget::Cluster
    }

    fn is_applicable(&self, _cm: &ClusterManager) -> bool {
        self.applicable
    }

    async fn invoke(&mut self, _cm: &mut ClusterManager, _node: Option<&str>) -> CtsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((cluster, line, count)) = &self.noise {
            for _ in 0..*count {
                cluster.append_log(line);
            }
        }
        if self.passes {
            Ok(())
        } else {
            Err(CtsError::test_failed(&self.name, "scripted failure"))
        }
    }
}

/// Audit with a fixed outcome
#[derive(Debug)]
pub struct ScriptedAudit {
    name: String,
    passes: bool,
}

impl ScriptedAudit {
    pub fn passing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: true,
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: false,
        }
    }
}

#[async_trait]
impl Audit for ScriptedAudit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _cm: &ClusterManager) -> CtsResult<()> {
        if self.passes {
            Ok(())
        } else {
            Err(CtsError::audit_failed(&self.name, "scripted failure"))
        }
    }
}

/// Driver with one resource group whose owners are set by the test
#[derive(Debug)]
pub struct FakeResourceDriver {
    resource: ResourceSpec,
    owners: Mutex<Vec<String>>,
}

impl FakeResourceDriver {
    /// `resource` is `type::instance` or a bare type
    pub fn new(resource: &str) -> Self {
        let resource = match resource.split_once("::") {
            Some((kind, instance)) => ResourceSpec::new(kind, Some(instance.to_string())),
            None => ResourceSpec::new(resource, None),
        };
        Self {
            resource,
            owners: Mutex::new(Vec::new()),
        }
    }

    pub fn set_owners(&self, nodes: &[&str]) {
        *self.owners.lock() = nodes.iter().map(|n| n.to_string()).collect();
    }
}

#[async_trait]
impl ClusterManagerDriver for FakeResourceDriver {
    fn name(&self) -> &'static str {
        "fake-resources"
    }

    fn description(&self) -> &'static str {
        "Generic driver with one scripted resource group"
    }

    fn default_config(&self) -> crate::config::ClusterConfigBuilder {
        GenericDriver.default_config()
    }

    async fn resource_groups(&self) -> CtsResult<Vec<ResourceGroup>> {
        Ok(vec![ResourceGroup::new(vec![self.resource.clone()])])
    }

    async fn resource_running_on(
        &self,
        _executor: &dyn RemoteExecutor,
        resource: &ResourceSpec,
        node: &str,
    ) -> CtsResult<bool> {
        Ok(*resource == self.resource && self.owners.lock().iter().any(|n| n == node))
    }
}
