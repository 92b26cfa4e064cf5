//! Believed node status and the operations that change it
//!
//! The tracker remembers, for every node, whether the cluster manager there
//! should be running. Start and stop update that belief only when the remote
//! command succeeds; a status query replaces it with what was observed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::error::{CtsError, CtsResult};
use crate::logging::LogFanout;
use crate::remote::RemoteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Up => "up",
            NodeStatus::Down => "down",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct NodeStatusTracker {
    config: Arc<ClusterConfig>,
    executor: Arc<dyn RemoteExecutor>,
    log: LogFanout,
    nodes: Vec<String>,
    believed: HashMap<String, NodeStatus>,
}

impl fmt::Debug for NodeStatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStatusTracker")
            .field("cluster", &self.config.name)
            .field("believed", &self.believed_statuses())
            .finish()
    }
}

impl NodeStatusTracker {
    /// Every node starts out believed down
    pub fn new(
        config: Arc<ClusterConfig>,
        executor: Arc<dyn RemoteExecutor>,
        nodes: Vec<String>,
        log: LogFanout,
    ) -> Self {
        let believed = nodes
            .iter()
            .map(|n| (n.clone(), NodeStatus::Down))
            .collect();
        Self {
            config,
            executor,
            log,
            nodes,
            believed,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn believed(&self, node: &str) -> CtsResult<NodeStatus> {
        self.believed
            .get(node)
            .copied()
            .ok_or_else(|| unknown(node))
    }

    pub fn is_believed_up(&self, node: &str) -> bool {
        self.believed.get(node) == Some(&NodeStatus::Up)
    }

    pub fn believed_statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.believed
            .iter()
            .map(|(n, s)| (n.clone(), *s))
            .collect()
    }

    /// Number of nodes believed up
    pub fn quorum_count(&self) -> usize {
        self.believed
            .values()
            .filter(|s| **s == NodeStatus::Up)
            .count()
    }

    /// Start the cluster manager on `node`
    ///
    /// Returns `Ok(false)` when the start command failed; belief is then left
    /// as it was.
    pub async fn start(&mut self, node: &str) -> CtsResult<bool> {
        self.ensure_known(node)?;
        let cmd = self.config.start_cmd.clone();
        if self.issue(node, &cmd).await {
            self.believed.insert(node.to_string(), NodeStatus::Up);
            Ok(true)
        } else {
            self.log
                .log(&format!("Could not start {} on node {}", self.config.name, node));
            Ok(false)
        }
    }

    /// Stop the cluster manager on `node`
    pub async fn stop(&mut self, node: &str) -> CtsResult<bool> {
        self.ensure_known(node)?;
        let cmd = self.config.stop_cmd.clone();
        if self.issue(node, &cmd).await {
            self.believed.insert(node.to_string(), NodeStatus::Down);
            Ok(true)
        } else {
            self.log
                .log(&format!("Could not stop {} on node {}", self.config.name, node));
            Ok(false)
        }
    }

    /// Ask the cluster manager on `node` to reread its configuration
    pub async fn reread_config(&mut self, node: &str) -> CtsResult<bool> {
        self.ensure_known(node)?;
        let cmd = self.config.reread_cmd.clone();
        if self.issue(node, &cmd).await {
            Ok(true)
        } else {
            self.log.log(&format!(
                "Could not force {} on node {} to reread its config",
                self.config.name, node
            ));
            Ok(false)
        }
    }

    /// Probe the status of `node` without touching belief
    pub async fn observe(&self, node: &str) -> CtsResult<NodeStatus> {
        self.ensure_known(node)?;
        let line = self
            .executor
            .run_and_capture_line(node, &self.config.status_cmd)
            .await?;
        let status = if line.contains(&self.config.status_stopped_marker) {
            NodeStatus::Down
        } else {
            NodeStatus::Up
        };
        debug!(node, %status, output = %line, "Observed node status");
        Ok(status)
    }

    /// Probe the status of `node` and adopt it as the new belief
    ///
    /// A disagreement with the previous belief is logged; the observation
    /// wins. If the probe itself fails the belief is unchanged.
    pub async fn query_status(&mut self, node: &str) -> CtsResult<NodeStatus> {
        self.adopt(node, true).await
    }

    async fn adopt(&mut self, node: &str, report_mismatch: bool) -> CtsResult<NodeStatus> {
        let observed = self.observe(node).await?;
        let previous = self.believed(node)?;
        if report_mismatch && observed != previous {
            warn!(node, %observed, %previous, "Node status mismatch");
            self.log.log(&format!(
                "Node status for {} is {} but we think it should be {}",
                node, observed, previous
            ));
        }
        self.believed.insert(node.to_string(), observed);
        Ok(observed)
    }

    /// Start every node in `subset` (all nodes when `None`) believed down
    ///
    /// Returns whether every attempted start succeeded.
    pub async fn start_all(&mut self, subset: Option<&[String]>) -> CtsResult<bool> {
        let mut all_ok = true;
        for node in self.select(subset, NodeStatus::Down)? {
            all_ok &= self.start(&node).await?;
        }
        Ok(all_ok)
    }

    /// Stop every node in `subset` believed up
    pub async fn stop_all(&mut self, subset: Option<&[String]>) -> CtsResult<bool> {
        let mut all_ok = true;
        for node in self.select(subset, NodeStatus::Up)? {
            all_ok &= self.stop(&node).await?;
        }
        Ok(all_ok)
    }

    /// Reread configuration on every node in `subset` believed up
    pub async fn reread_all(&mut self, subset: Option<&[String]>) -> CtsResult<bool> {
        let mut all_ok = true;
        for node in self.select(subset, NodeStatus::Up)? {
            all_ok &= self.reread_config(&node).await?;
        }
        Ok(all_ok)
    }

    /// Query and reconcile every node in `subset`
    ///
    /// Nodes whose probe fails are logged and left out of the result.
    pub async fn status_all(
        &mut self,
        subset: Option<&[String]>,
    ) -> CtsResult<BTreeMap<String, NodeStatus>> {
        self.refresh(subset, true).await
    }

    /// Adopt every node's observed status as the first belief
    ///
    /// Nothing was believed before, so disagreements are not reported.
    pub async fn seed_all(&mut self) -> CtsResult<BTreeMap<String, NodeStatus>> {
        self.refresh(None, false).await
    }

    async fn refresh(
        &mut self,
        subset: Option<&[String]>,
        report_mismatch: bool,
    ) -> CtsResult<BTreeMap<String, NodeStatus>> {
        let targets = match subset {
            Some(names) => {
                for name in names {
                    self.ensure_known(name)?;
                }
                names.to_vec()
            }
            None => self.nodes.clone(),
        };

        let mut result = BTreeMap::new();
        for node in targets {
            match self.adopt(&node, report_mismatch).await {
                Ok(status) => {
                    result.insert(node, status);
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "Status query failed");
                    self.log.log(&format!("Could not query status of {}: {}", node, e));
                }
            }
        }
        Ok(result)
    }

    fn ensure_known(&self, node: &str) -> CtsResult<()> {
        if self.believed.contains_key(node) {
            Ok(())
        } else {
            Err(unknown(node))
        }
    }

    /// Nodes from `subset`, in lab order, currently believed `status`
    fn select(&self, subset: Option<&[String]>, status: NodeStatus) -> CtsResult<Vec<String>> {
        if let Some(names) = subset {
            for name in names {
                self.ensure_known(name)?;
            }
        }
        Ok(self
            .nodes
            .iter()
            .filter(|n| subset.map_or(true, |names| names.contains(n)))
            .filter(|n| self.believed.get(n.as_str()) == Some(&status))
            .cloned()
            .collect())
    }

    async fn issue(&self, node: &str, command: &str) -> bool {
        match self.executor.run(node, command).await {
            Ok(0) => true,
            Ok(rc) => {
                debug!(node, command, rc, "Remote command failed");
                false
            }
            Err(e) => {
                warn!(node, command, error = %e, "Remote command could not be issued");
                false
            }
        }
    }
}

fn unknown(node: &str) -> CtsError {
    CtsError::UnknownNode {
        node: node.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeCluster, RecordingSink};

    fn tracker(cluster: &FakeCluster, sink: Arc<RecordingSink>) -> NodeStatusTracker {
        NodeStatusTracker::new(
            Arc::new(cluster.config().clone()),
            Arc::new(cluster.clone()),
            cluster.node_names(),
            LogFanout::new(vec![sink]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_start_stop_update_belief() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let mut t = tracker(&cluster, Arc::new(RecordingSink::new()));

        assert_eq!(t.quorum_count(), 0);
        assert!(t.start("n1").await.unwrap());
        assert_eq!(t.believed("n1").unwrap(), NodeStatus::Up);
        assert_eq!(t.quorum_count(), 1);

        assert!(t.stop("n1").await.unwrap());
        assert_eq!(t.believed("n1").unwrap(), NodeStatus::Down);
        assert_eq!(t.quorum_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_start_keeps_belief_and_logs() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.fail_next("n1", "start");
        let sink = Arc::new(RecordingSink::new());
        let mut t = tracker(&cluster, sink.clone());

        assert!(!t.start("n1").await.unwrap());
        assert_eq!(t.believed("n1").unwrap(), NodeStatus::Down);
        assert!(sink.contains("Could not start"));
    }

    #[tokio::test]
    async fn test_query_adopts_observation_and_warns() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.set_running("n2", true);
        let sink = Arc::new(RecordingSink::new());
        let mut t = tracker(&cluster, sink.clone());

        assert_eq!(t.query_status("n2").await.unwrap(), NodeStatus::Up);
        assert_eq!(t.believed("n2").unwrap(), NodeStatus::Up);
        assert!(sink.contains("Node status for n2 is up but we think it should be down"));
    }

    #[tokio::test]
    async fn test_observe_does_not_change_belief() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.set_running("n1", true);
        let t = tracker(&cluster, Arc::new(RecordingSink::new()));

        assert_eq!(t.observe("n1").await.unwrap(), NodeStatus::Up);
        assert_eq!(t.believed("n1").unwrap(), NodeStatus::Down);
    }

    #[tokio::test]
    async fn test_aggregates_respect_preconditions() {
        let cluster = FakeCluster::new(&["n1", "n2", "n3"]);
        let mut t = tracker(&cluster, Arc::new(RecordingSink::new()));

        assert!(t.start("n1").await.unwrap());
        cluster.clear_commands();

        assert!(t.start_all(None).await.unwrap());
        // n1 was already believed up
        assert_eq!(cluster.commands_for("n1"), Vec::<String>::new());
        assert_eq!(t.quorum_count(), 3);

        let subset = vec!["n2".to_string()];
        assert!(t.stop_all(Some(&subset)).await.unwrap());
        assert_eq!(t.believed("n2").unwrap(), NodeStatus::Down);
        assert_eq!(t.believed("n3").unwrap(), NodeStatus::Up);

        cluster.clear_commands();
        assert!(t.reread_all(None).await.unwrap());
        assert!(cluster.commands_for("n2").is_empty());
        assert_eq!(cluster.commands_for("n1").len(), 1);
    }

    #[tokio::test]
    async fn test_status_all_reports_every_node() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.set_running("n1", true);
        let mut t = tracker(&cluster, Arc::new(RecordingSink::new()));

        let statuses = t.status_all(None).await.unwrap();
        assert_eq!(statuses.get("n1"), Some(&NodeStatus::Up));
        assert_eq!(statuses.get("n2"), Some(&NodeStatus::Down));
        assert_eq!(t.quorum_count(), 1);
    }

    #[tokio::test]
    async fn test_seeding_adopts_status_quietly() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.set_running("n2", true);
        let sink = Arc::new(RecordingSink::new());
        let mut t = tracker(&cluster, sink.clone());

        let statuses = t.seed_all().await.unwrap();
        assert_eq!(statuses.get("n2"), Some(&NodeStatus::Up));
        assert_eq!(t.believed("n2").unwrap(), NodeStatus::Up);
        assert_eq!(sink.count_containing("Node status for"), 0);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let mut t = tracker(&cluster, Arc::new(RecordingSink::new()));
        assert!(matches!(t.start("ghost").await, Err(CtsError::UnknownNode { .. })));
        let subset = vec!["ghost".to_string()];
        assert!(t.stop_all(Some(&subset)).await.is_err());
    }
}
