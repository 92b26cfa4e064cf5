//! Fault tests
//!
//! Each test performs one disruptive operation against the cluster and
//! reports whether the cluster reacted as expected. Whether a test needs a
//! node argument is declared through [`FaultTest::target`]; the loop picks a
//! random node for node-level tests.
//!
//! Start and stop are confirmed through the cluster log: a watcher is armed
//! before the command is issued and must see the matching event within the
//! configured start or dead time.

use async_trait::async_trait;
use tracing::debug;

use crate::cluster_manager::ClusterManager;
use crate::config::LogEvent;
use crate::error::{CtsError, CtsResult};
use crate::tracker::NodeStatus;

/// What a test operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTarget {
    /// The whole cluster; invoked without a node
    Cluster,
    /// One node, chosen at random by the caller
    Node,
}

#[async_trait]
pub trait FaultTest: Send + Sync {
    fn name(&self) -> &str;

    fn target(&self) -> TestTarget;

    /// Whether this test can run against this cluster
    fn is_applicable(&self, _cm: &ClusterManager) -> bool {
        true
    }

    /// Run the test; `Err` means the test failed
    ///
    /// `node` is `Some` exactly when [`target`](Self::target) is
    /// [`TestTarget::Node`].
    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()>;
}

/// Every built-in test
pub fn standard_tests() -> Vec<Box<dyn FaultTest>> {
    vec![
        Box::new(StartTest),
        Box::new(StopTest),
        Box::new(RestartTest),
        Box::new(FlipTest),
        Box::new(RereadTest),
        Box::new(ResetTest),
    ]
}

/// Built-in tests selected by name, case-insensitively
pub fn tests_named(names: &[String]) -> CtsResult<Vec<Box<dyn FaultTest>>> {
    let mut available = standard_tests();
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let position = available
            .iter()
            .position(|t| t.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CtsError::configuration(
                    "lab.tests",
                    format!(
                        "unknown test '{}'; known tests: {}",
                        name,
                        standard_tests()
                            .iter()
                            .map(|t| t.name().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
            })?;
        selected.push(available.remove(position));
    }
    Ok(selected)
}

fn require_node<'a>(test: &str, node: Option<&'a str>) -> CtsResult<&'a str> {
    node.ok_or_else(|| CtsError::test_failed(test, "invoked without a node"))
}

/// Start `node` and wait for the log to confirm it
async fn confirmed_start(cm: &mut ClusterManager, test: &str, node: &str) -> CtsResult<()> {
    let timeout = cm.config().start_time;
    let mut watcher = cm.watch_for(LogEvent::TheyStarted, Some(node), timeout).await?;

    if !cm.tracker_mut().start(node).await? {
        return Err(CtsError::test_failed(test, format!("could not start {}", node)));
    }
    match watcher.poll(None).await? {
        Some(line) => {
            debug!(node, line = %line, "Start confirmed");
            Ok(())
        }
        None => Err(CtsError::test_failed(
            test,
            format!("{} did not report started within {:?}", node, timeout),
        )),
    }
}

/// Stop `node` and wait for the log to confirm it
async fn confirmed_stop(cm: &mut ClusterManager, test: &str, node: &str) -> CtsResult<()> {
    let timeout = cm.config().dead_time;
    let mut watcher = cm.watch_for(LogEvent::TheyStopped, Some(node), timeout).await?;

    if !cm.tracker_mut().stop(node).await? {
        return Err(CtsError::test_failed(test, format!("could not stop {}", node)));
    }
    match watcher.poll(None).await? {
        Some(line) => {
            debug!(node, line = %line, "Stop confirmed");
            Ok(())
        }
        None => Err(CtsError::test_failed(
            test,
            format!("{} was not reported stopped within {:?}", node, timeout),
        )),
    }
}

/// Start the cluster manager on a node, stopping it first if needed
#[derive(Debug, Clone, Default)]
pub struct StartTest;

#[async_trait]
impl FaultTest for StartTest {
    fn name(&self) -> &str {
        "Start"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Node
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()> {
        let node = require_node(self.name(), node)?;
        if cm.tracker().believed(node)? == NodeStatus::Up
            && !cm.tracker_mut().stop(node).await?
        {
            return Err(CtsError::test_failed(
                self.name(),
                format!("could not stop {} before starting it", node),
            ));
        }
        confirmed_start(cm, self.name(), node).await
    }
}

/// Stop the cluster manager on a node, starting it first if needed
#[derive(Debug, Clone, Default)]
pub struct StopTest;

#[async_trait]
impl FaultTest for StopTest {
    fn name(&self) -> &str {
        "Stop"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Node
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()> {
        let node = require_node(self.name(), node)?;
        if cm.tracker().believed(node)? == NodeStatus::Down
            && !cm.tracker_mut().start(node).await?
        {
            return Err(CtsError::test_failed(
                self.name(),
                format!("could not start {} before stopping it", node),
            ));
        }
        confirmed_stop(cm, self.name(), node).await
    }
}

/// Stop then start a node, both confirmed
#[derive(Debug, Clone, Default)]
pub struct RestartTest;

#[async_trait]
impl FaultTest for RestartTest {
    fn name(&self) -> &str {
        "Restart"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Node
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()> {
        let node = require_node(self.name(), node)?;
        if cm.tracker().believed(node)? == NodeStatus::Up {
            confirmed_stop(cm, self.name(), node).await?;
        }
        confirmed_start(cm, self.name(), node).await
    }
}

/// Toggle a node: stop it if up, start it if down
#[derive(Debug, Clone, Default)]
pub struct FlipTest;

#[async_trait]
impl FaultTest for FlipTest {
    fn name(&self) -> &str {
        "Flip"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Node
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()> {
        let node = require_node(self.name(), node)?;
        match cm.tracker().believed(node)? {
            NodeStatus::Up => confirmed_stop(cm, self.name(), node).await,
            NodeStatus::Down => confirmed_start(cm, self.name(), node).await,
        }
    }
}

/// Make every running cluster manager reread its configuration
#[derive(Debug, Clone, Default)]
pub struct RereadTest;

#[async_trait]
impl FaultTest for RereadTest {
    fn name(&self) -> &str {
        "Reread"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Cluster
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, _node: Option<&str>) -> CtsResult<()> {
        if cm.tracker_mut().reread_all(None).await? {
            Ok(())
        } else {
            Err(CtsError::test_failed(
                self.name(),
                "not every running node reread its configuration",
            ))
        }
    }
}

/// Power-cycle a node and bring its cluster manager back
///
/// Only applicable when the lab has a reset mechanism and reset tests are
/// enabled.
#[derive(Debug, Clone, Default)]
pub struct ResetTest;

#[async_trait]
impl FaultTest for ResetTest {
    fn name(&self) -> &str {
        "Reset"
    }

    fn target(&self) -> TestTarget {
        TestTarget::Node
    }

    fn is_applicable(&self, cm: &ClusterManager) -> bool {
        cm.lab().reset_mechanism().is_available() && cm.lab().settings().reset_tests_enabled
    }

    async fn invoke(&mut self, cm: &mut ClusterManager, node: Option<&str>) -> CtsResult<()> {
        let node = require_node(self.name(), node)?;
        let dead_time = cm.config().dead_time;
        let was_up = cm.tracker().believed(node)? == NodeStatus::Up;

        // only a running peer can report the node dead
        let peers_up = cm
            .tracker()
            .nodes()
            .iter()
            .any(|n| n != node && cm.tracker().is_believed_up(n));
        let mut watcher = if was_up && peers_up {
            Some(cm.watch_for(LogEvent::TheyStopped, Some(node), dead_time).await?)
        } else {
            None
        };

        if !cm.lab().reset_node(node).await? {
            return Err(CtsError::test_failed(self.name(), format!("reset of {} failed", node)));
        }

        if let Some(watcher) = watcher.as_mut() {
            if watcher.poll(None).await?.is_none() {
                return Err(CtsError::test_failed(
                    self.name(),
                    format!("{} was not reported dead within {:?}", node, dead_time),
                ));
            }
        }

        if cm.tracker_mut().query_status(node).await? == NodeStatus::Down {
            confirmed_start(cm, self.name(), node).await?;
        }
        Ok(())
    }
}
