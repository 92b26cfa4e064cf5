//! Built-in scenario components

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::ScenarioComponent;
use crate::cluster_manager::ClusterManager;
use crate::config::defaults::*;
use crate::error::{CtsError, CtsResult};
use crate::lab::{Lab, Node};

/// Checks whether a node is booted and reachable
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn is_reachable(&self, node: &Node) -> bool;
}

/// Reachability through a single ICMP echo
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
        }
    }
}

impl PingProbe {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl NodeProbe for PingProbe {
    async fn is_reachable(&self, node: &Node) -> bool {
        Command::new(&self.program)
            .args(["-nq", "-c1", "-w1"])
            .arg(node.address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Bring the cluster manager up on every node
///
/// Waits for every node to answer the probe, seeds believed status, stops
/// whatever is already running and then starts everything. Teardown waits for
/// the nodes again and stops everything.
pub struct InitClusterManager {
    probe: Arc<dyn NodeProbe>,
    boot_timeout: Option<Duration>,
    probe_interval: Duration,
    settle_time: Duration,
}

impl InitClusterManager {
    pub fn new(probe: Arc<dyn NodeProbe>) -> Self {
        Self {
            probe,
            boot_timeout: None,
            probe_interval: Duration::from_secs(1),
            settle_time: duration_secs(DEFAULT_BOOT_SETTLE_SECS),
        }
    }

    /// Wait budget per node; the lab's boot timeout when not set
    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = Some(timeout);
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Extra wait after a node that was down starts answering
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle_time = settle;
        self
    }

    async fn wait_for_node(&self, lab: &Lab, node: &Node, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut waited = false;

        loop {
            if self.probe.is_reachable(node).await {
                if waited {
                    tokio::time::sleep(self.settle_time).await;
                    lab.log(&format!("Node {} now up", node));
                }
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                lab.log(&format!("{} did not come up within {:?}", node, timeout));
                return false;
            }
            if !waited {
                lab.log(&format!("Waiting for node {} to come up", node));
                waited = true;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    async fn wait_for_all_nodes(&self, lab: &Lab) -> CtsResult<()> {
        let timeout = self.boot_timeout.unwrap_or(lab.settings().boot_timeout);
        for node in lab.nodes() {
            if !self.wait_for_node(lab, node, timeout).await {
                return Err(CtsError::Timeout {
                    operation: format!("waiting for node {} to boot", node),
                    duration: timeout,
                });
            }
        }
        Ok(())
    }

    async fn stop_everything(&self, cm: &mut ClusterManager) -> CtsResult<()> {
        cm.log("Stopping Cluster Manager on all nodes");
        if !cm.tracker_mut().stop_all(None).await? {
            warn!("Some cluster managers did not stop cleanly");
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioComponent for InitClusterManager {
    fn name(&self) -> &str {
        "InitClusterManager"
    }

    fn is_applicable(&self, _lab: &Lab) -> bool {
        true
    }

    async fn set_up(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        self.wait_for_all_nodes(cm.lab()).await?;
        cm.prepare().await?;

        // clear the cobwebs
        self.stop_everything(cm).await?;

        cm.log("Starting Cluster Manager on all nodes");
        // nodes that failed to start stay believed down; the tests bring them up later
        if !cm.tracker_mut().start_all(None).await? {
            warn!(cluster = %cm.name(), "Not every node started");
            cm.log(&format!("{} did not start on every node", cm.name()));
        }
        Ok(())
    }

    async fn tear_down(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        if let Err(e) = self.wait_for_all_nodes(cm.lab()).await {
            // stop what can be reached anyway
            warn!(error = %e, "Not every node is up for teardown");
        }
        self.stop_everything(cm).await
    }
}

/// Flood-ping every node from the test machine for the whole run
pub struct PingFlood {
    program: String,
    args: Vec<String>,
    children: Vec<(String, Child)>,
}

impl Default for PingFlood {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            args: vec!["-qfn".to_string(), "-s".to_string(), "{size}".to_string()],
            children: Vec::new(),
        }
    }
}

impl PingFlood {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the flood command; `{size}` in an argument becomes the ping
    /// size and the node address is appended last
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Vec::new(),
        }
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    fn spawn(&self, node: &Node, size: u32) -> CtsResult<Child> {
        let size = size.to_string();
        Command::new(&self.program)
            .args(self.args.iter().map(|a| a.replace("{size}", &size)))
            .arg(node.address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CtsError::process(&self.program, format!("Cannot spawn flood ping: {}", e)))
    }

    async fn kill_all(&mut self, cm: &ClusterManager) {
        for (node, mut child) in self.children.drain(..) {
            if let Some(pid) = child.id() {
                cm.log(&format!("Stopping ping process {}", pid));
            }
            if let Err(e) = child.kill().await {
                warn!(node = %node, error = %e, "Failed to stop ping process");
            }
        }
    }
}

#[async_trait]
impl ScenarioComponent for PingFlood {
    fn name(&self) -> &str {
        "PingFlood"
    }

    fn is_applicable(&self, _lab: &Lab) -> bool {
        true
    }

    async fn set_up(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        let size = cm.lab().settings().ping_size;
        cm.log(&format!("Starting {} byte flood pings", size));

        let nodes = cm.lab().nodes().to_vec();
        for node in &nodes {
            match self.spawn(node, size) {
                Ok(child) => self.children.push((node.name.clone(), child)),
                Err(e) => {
                    // release what was already started before reporting
                    self.kill_all(cm).await;
                    return Err(e);
                }
            }
        }

        let pids: Vec<String> = self
            .children
            .iter()
            .filter_map(|(_, c)| c.id())
            .map(|pid| pid.to_string())
            .collect();
        cm.log(&format!("Ping PIDs: [{}]", pids.join(", ")));
        Ok(())
    }

    async fn tear_down(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        self.kill_all(cm).await;
        Ok(())
    }
}

/// Start from an empty cluster log
#[derive(Debug, Clone, Default)]
pub struct TruncateLogs;

#[async_trait]
impl ScenarioComponent for TruncateLogs {
    fn name(&self) -> &str {
        "TruncateLogs"
    }

    fn is_applicable(&self, _lab: &Lab) -> bool {
        true
    }

    async fn set_up(&mut self, cm: &mut ClusterManager) -> CtsResult<()> {
        cm.truncate_logs().await?;
        debug!("Cluster log truncated");
        Ok(())
    }

    async fn tear_down(&mut self, _cm: &mut ClusterManager) -> CtsResult<()> {
        Ok(())
    }
}
