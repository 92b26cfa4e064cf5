//! The cluster manager handle
//!
//! [`ClusterManager`] is what scenario components, fault tests and audits
//! operate on. It ties together the lab, the selected driver, the validated
//! configuration and the node status tracker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ClusterConfig, LogEvent};
use crate::driver::ClusterManagerDriver;
use crate::error::{CtsError, CtsResult};
use crate::lab::Lab;
use crate::log_watcher::LogWatcher;
use crate::remote::RemoteExecutor;
use crate::resource::ResourceGroup;
use crate::tracker::NodeStatusTracker;

pub struct ClusterManager {
    lab: Arc<Lab>,
    driver: Arc<dyn ClusterManagerDriver>,
    config: Arc<ClusterConfig>,
    tracker: NodeStatusTracker,
}

impl fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterManager")
            .field("driver", &self.driver.name())
            .field("config", &self.config.name)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl ClusterManager {
    pub fn new(
        lab: Arc<Lab>,
        driver: Arc<dyn ClusterManagerDriver>,
        config: ClusterConfig,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        let config = Arc::new(config);
        let tracker = NodeStatusTracker::new(
            config.clone(),
            executor,
            lab.node_names().map(str::to_string).collect(),
            lab.log_fanout().clone(),
        );
        Self {
            lab,
            driver,
            config,
            tracker,
        }
    }

    pub fn lab(&self) -> &Lab {
        &self.lab
    }

    pub fn driver(&self) -> &dyn ClusterManagerDriver {
        self.driver.as_ref()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn tracker(&self) -> &NodeStatusTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut NodeStatusTracker {
        &mut self.tracker
    }

    pub fn executor(&self) -> &dyn RemoteExecutor {
        self.tracker.executor().as_ref()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn log(&self, line: &str) {
        self.lab.log(line);
    }

    /// Seed believed status from one query per node
    pub async fn prepare(&mut self) -> CtsResult<()> {
        let statuses = self.tracker.seed_all().await?;
        info!(cluster = %self.config.name, up = self.tracker.quorum_count(), "Cluster prepared");
        debug!(?statuses, "Initial node status");
        Ok(())
    }

    pub fn has_quorum(&self) -> bool {
        self.driver.has_quorum(&self.tracker)
    }

    pub async fn resource_groups(&self) -> CtsResult<Vec<ResourceGroup>> {
        self.driver.resource_groups().await
    }

    /// A watcher over the cluster log using the lab's poll interval
    pub fn watcher<I, S>(&self, patterns: I) -> CtsResult<LogWatcher>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(LogWatcher::new(&self.config.log_file, patterns)?
            .with_poll_interval(self.lab.settings().watch_poll_interval))
    }

    /// An armed watcher for one named event, ready before the action that
    /// should cause it
    pub async fn watch_for(
        &self,
        event: LogEvent,
        node: Option<&str>,
        timeout: Duration,
    ) -> CtsResult<LogWatcher> {
        let pattern = self.config.pattern(event, node).ok_or_else(|| CtsError::NotApplicable {
            what: format!("{} has no pattern for {:?}", self.config.name, event),
        })?;
        let mut watcher = self.watcher([pattern])?.with_timeout(timeout);
        watcher.arm(false).await?;
        Ok(watcher)
    }

    /// Truncate the cluster log so watchers start from a clean file
    pub async fn truncate_logs(&self) -> CtsResult<()> {
        let path = &self.config.log_file;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| CtsError::log_watch(path, format!("open for truncate: {}", e)))?;
        file.set_len(0)
            .await
            .map_err(|e| CtsError::log_watch(path, format!("truncate: {}", e)))?;
        debug!(path = %path.display(), "Truncated cluster log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeCluster;
    use crate::tracker::NodeStatus;

    #[tokio::test]
    async fn test_prepare_and_quorum() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.set_running("n2", true);
        let mut cm = cluster.cluster_manager(1).await;

        assert!(!cm.has_quorum());
        cm.prepare().await.unwrap();
        assert_eq!(cm.tracker().believed("n2").unwrap(), NodeStatus::Up);
        assert!(cm.has_quorum());
        assert!(!cluster.sink().contains("we think it should be"));
    }

    #[tokio::test]
    async fn test_watch_for_sees_start() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let mut cm = cluster.cluster_manager(1).await;

        let mut watcher = cm
            .watch_for(LogEvent::TheyStarted, Some("n1"), Duration::ZERO)
            .await
            .unwrap();
        assert!(cm.tracker_mut().start("n1").await.unwrap());
        assert!(watcher.poll(None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_truncate_logs() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        cluster.append_log("something old");
        let cm = cluster.cluster_manager(1).await;

        cm.truncate_logs().await.unwrap();
        assert_eq!(std::fs::metadata(cluster.log_path()).unwrap().len(), 0);
    }
}
