//! Post-test consistency audits
//!
//! Audits run after every test and check invariants that should hold no
//! matter which fault was just injected. An audit never changes cluster
//! state or believed status.

use async_trait::async_trait;
use tracing::debug;

use crate::cluster_manager::ClusterManager;
use crate::error::{CtsError, CtsResult};

#[async_trait]
pub trait Audit: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` means the audit failed
    async fn check(&self, cm: &ClusterManager) -> CtsResult<()>;
}

/// Every built-in audit
pub fn standard_audits() -> Vec<Box<dyn Audit>> {
    vec![Box::new(StatusAudit), Box::new(ResourceAudit)]
}

/// Built-in audits selected by name, case-insensitively
pub fn audits_named(names: &[String]) -> CtsResult<Vec<Box<dyn Audit>>> {
    names
        .iter()
        .map(|name| {
            standard_audits()
                .into_iter()
                .find(|a| a.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    CtsError::configuration("lab.audits", format!("unknown audit '{}'", name))
                })
        })
        .collect()
}

/// Observed status of every node matches what the harness believes
#[derive(Debug, Clone, Default)]
pub struct StatusAudit;

#[async_trait]
impl Audit for StatusAudit {
    fn name(&self) -> &str {
        "Status"
    }

    async fn check(&self, cm: &ClusterManager) -> CtsResult<()> {
        let tracker = cm.tracker();
        let mut problems = Vec::new();

        for node in tracker.nodes() {
            let believed = tracker.believed(node)?;
            match tracker.observe(node).await {
                Ok(observed) if observed == believed => {}
                Ok(observed) => problems.push(format!(
                    "{} is {} but should be {}",
                    node, observed, believed
                )),
                Err(e) => problems.push(format!("{} could not be probed: {}", node, e)),
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CtsError::audit_failed(self.name(), problems.join("; ")))
        }
    }
}

/// Each resource group runs on exactly one node while the cluster has
/// quorum, and nowhere without it
///
/// Only the first resource of a group is probed; the rest follow it.
#[derive(Debug, Clone, Default)]
pub struct ResourceAudit;

#[async_trait]
impl Audit for ResourceAudit {
    fn name(&self) -> &str {
        "Resource"
    }

    async fn check(&self, cm: &ClusterManager) -> CtsResult<()> {
        let groups = cm.resource_groups().await?;
        let quorum = cm.has_quorum();
        let driver = cm.driver();
        let executor = cm.executor();
        let mut problems = Vec::new();

        for group in &groups {
            let Some(primary) = group.primary() else {
                continue;
            };

            let mut owners = Vec::new();
            for node in cm.tracker().nodes() {
                match driver.resource_running_on(executor, primary, node).await {
                    Ok(true) => owners.push(node.as_str()),
                    Ok(false) => {}
                    Err(e) => {
                        problems.push(format!("{} could not be probed on {}: {}", primary, node, e))
                    }
                }
            }
            debug!(resource = %primary, ?owners, quorum, "Resource owners");

            match (quorum, owners.as_slice()) {
                (true, [owner]) => {
                    match driver.resource_working_correctly(executor, primary, owner).await {
                        Ok(true) => {}
                        Ok(false) => problems.push(format!(
                            "{} runs on {} but is not working correctly",
                            primary, owner
                        )),
                        Err(e) => problems.push(format!(
                            "{} could not be verified on {}: {}",
                            primary, owner, e
                        )),
                    }
                }
                (true, []) => problems.push(format!("{} is not running anywhere", primary)),
                (true, many) => problems.push(format!(
                    "{} is running on {} nodes: {}",
                    primary,
                    many.len(),
                    many.join(", ")
                )),
                (false, []) => {}
                (false, some) => problems.push(format!(
                    "{} is running on {} without quorum",
                    primary,
                    some.join(", ")
                )),
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CtsError::audit_failed(self.name(), problems.join("; ")))
        }
    }
}
