//! The randomized fault-injection loop
//!
//! A run sets up the scenario, then repeatedly picks a random applicable
//! test, invokes it, checks the cluster log for bad news and runs every
//! audit. Sustained bad news aborts the run; otherwise the scenario is torn
//! down and the statistics are returned.
//!
//! Everything happens sequentially on the caller's task. The generator is
//! seeded from the lab, so a seed reproduces the sequence of tests and nodes.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audits::Audit;
use crate::cluster_manager::ClusterManager;
use crate::config::defaults::{DEFAULT_BAD_NEWS_CHECKS, DEFAULT_HARNESS_MARKER};
use crate::config::ClusterConfig;
use crate::error::{CtsError, CtsResult};
use crate::faults::{FaultTest, TestTarget};
use crate::log_watcher::LogWatcher;
use crate::scenario::Scenario;
use crate::stats::{Outcome, RunStatistics};

/// How bad news found in the cluster log is escalated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadNewsPolicy {
    /// Consecutive non-clean checks that abort the run
    pub max_checks: usize,
    /// Lines containing this were written by the harness itself; they use up
    /// a check but are not bad news
    pub harness_marker: String,
    /// Whether a clean check forgets earlier bad news
    ///
    /// When false, non-clean checks accumulate across iterations and the
    /// run aborts once their total reaches `max_checks`.
    pub reset_on_clean: bool,
}

impl Default for BadNewsPolicy {
    fn default() -> Self {
        Self {
            max_checks: DEFAULT_BAD_NEWS_CHECKS,
            harness_marker: DEFAULT_HARNESS_MARKER.to_string(),
            reset_on_clean: true,
        }
    }
}

impl BadNewsPolicy {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            harness_marker: config.harness_marker.clone(),
            ..Self::default()
        }
    }
}

pub struct FaultInjectionLoop {
    scenario: Scenario,
    cm: ClusterManager,
    tests: Vec<Box<dyn FaultTest>>,
    audits: Vec<Box<dyn Audit>>,
    policy: BadNewsPolicy,
    rng: ChaCha8Rng,
    unresolved_checks: usize,
}

impl std::fmt::Debug for FaultInjectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectionLoop")
            .field("scenario", &self.scenario)
            .field("tests", &self.test_names())
            .field("audits", &self.audits.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

impl FaultInjectionLoop {
    /// Assemble a loop
    ///
    /// Tests that are not applicable to this cluster are dropped. A scenario
    /// that does not apply to the lab, or no applicable test at all, is a
    /// configuration error.
    pub fn new(
        scenario: Scenario,
        cm: ClusterManager,
        tests: Vec<Box<dyn FaultTest>>,
        audits: Vec<Box<dyn Audit>>,
    ) -> CtsResult<Self> {
        if !scenario.is_applicable(cm.lab()) {
            return Err(CtsError::configuration(
                "scenario",
                format!(
                    "scenario {:?} is not applicable in this lab",
                    scenario.component_names()
                ),
            ));
        }

        let (tests, skipped): (Vec<_>, Vec<_>) =
            tests.into_iter().partition(|t| t.is_applicable(&cm));
        for test in &skipped {
            info!(test = %test.name(), "Test not applicable, skipping");
        }
        if tests.is_empty() {
            return Err(CtsError::configuration(
                "lab.tests",
                "no applicable tests for this cluster",
            ));
        }

        let policy = BadNewsPolicy::from_config(cm.config());
        let rng = cm.lab().rng();
        Ok(Self {
            scenario,
            cm,
            tests,
            audits,
            policy,
            rng,
            unresolved_checks: 0,
        })
    }

    pub fn with_policy(mut self, policy: BadNewsPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &BadNewsPolicy {
        &self.policy
    }

    /// Names of the applicable tests, in selection order
    pub fn test_names(&self) -> Vec<&str> {
        self.tests.iter().map(|t| t.name()).collect()
    }

    pub fn cluster_manager(&self) -> &ClusterManager {
        &self.cm
    }

    pub fn cluster_manager_mut(&mut self) -> &mut ClusterManager {
        &mut self.cm
    }

    /// Run `iterations` randomly chosen tests
    ///
    /// Returns [`CtsError::ScenarioSetup`] without statistics if the scenario
    /// could not be set up, and [`CtsError::RunAborted`] carrying the partial
    /// statistics if bad news persisted. After an abort every node has been
    /// asked to stop and the scenario is left as it was.
    pub async fn run(&mut self, iterations: u64) -> CtsResult<RunStatistics> {
        info!(iterations, seed = self.cm.lab().seed(), tests = ?self.test_names(), "Starting run");
        self.scenario.set_up(&mut self.cm).await?;

        let result = self.run_iterations(iterations).await;
        if matches!(result, Err(CtsError::RunAborted { .. })) {
            return result;
        }

        if let Err(e) = self.scenario.tear_down(&mut self.cm).await {
            error!(error = %e, "Scenario teardown failed");
            self.cm.log(&format!("Scenario teardown failed: {}", e));
        }

        let stats = result?;
        self.log_results(&stats);
        Ok(stats)
    }

    async fn run_iterations(&mut self, iterations: u64) -> CtsResult<RunStatistics> {
        let mut stats = RunStatistics::new(self.cm.lab().seed(), self.test_names());
        self.unresolved_checks = 0;

        let mut bad_news = self
            .cm
            .watcher(&self.cm.config().bad_regexes)?
            .with_timeout(Duration::ZERO);
        bad_news.arm(false).await?;

        for audit in &self.audits {
            if let Err(e) = audit.check(&self.cm).await {
                warn!(audit = %audit.name(), error = %e, "Initial audit failed");
                self.cm.log(&format!("Audit {} Failed.", audit.name()));
                stats.record_aggregate(Outcome::AuditFailure);
            }
        }

        for iteration in 1..=iterations {
            let index = self.rng.gen_range(0..self.tests.len());
            let name = self.tests[index].name().to_string();
            let node = match self.tests[index].target() {
                TestTarget::Node => Some(self.cm.lab().random_node(&mut self.rng).name.clone()),
                TestTarget::Cluster => None,
            };

            match &node {
                Some(node) => self
                    .cm
                    .log(&format!("Running test {} ({}) [{}]", name, node, iteration)),
                None => self.cm.log(&format!("Running test {} [{}]", name, iteration)),
            }

            match self.tests[index].invoke(&mut self.cm, node.as_deref()).await {
                Ok(()) => {
                    debug!(test = %name, iteration, "Test passed");
                    stats.record(&name, Outcome::Success);
                }
                Err(e) => {
                    warn!(test = %name, iteration, error = %e, "Test failed");
                    self.cm.log(&format!("Test {} failed: {}", name, e));
                    stats.record(&name, Outcome::Failure);
                    if let Err(e) = self.cm.tracker_mut().status_all(None).await {
                        warn!(error = %e, "Could not refresh cluster status");
                    }
                }
            }
            stats.iterations_completed = iteration;

            if self.bad_news_persists(&mut bad_news, &mut stats, &name).await {
                return Err(self.abort(iteration, stats).await);
            }

            for audit in &self.audits {
                if let Err(e) = audit.check(&self.cm).await {
                    warn!(audit = %audit.name(), test = %name, iteration, error = %e, "Audit failed");
                    self.cm.log(&format!("Audit {} Failed.", audit.name()));
                    stats.record(&name, Outcome::AuditFailure);
                }
            }
        }

        Ok(stats)
    }

    /// Check the log up to `max_checks` times; true when no check was clean
    async fn bad_news_persists(
        &mut self,
        watcher: &mut LogWatcher,
        stats: &mut RunStatistics,
        test: &str,
    ) -> bool {
        for _ in 0..self.policy.max_checks {
            match watcher.poll(Some(Duration::ZERO)).await {
                Ok(Some(line)) => {
                    if !line.contains(&self.policy.harness_marker) {
                        warn!(test, line = %line, "Bad news");
                        self.cm.log(&format!("BadNews: {}", line));
                        stats.record(test, Outcome::BadNews);
                    }
                    self.unresolved_checks += 1;
                    if self.unresolved_checks >= self.policy.max_checks {
                        return true;
                    }
                }
                Ok(None) => {
                    if self.policy.reset_on_clean {
                        self.unresolved_checks = 0;
                    }
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Bad news check failed, treating as clean");
                    if self.policy.reset_on_clean {
                        self.unresolved_checks = 0;
                    }
                    return false;
                }
            }
        }
        self.unresolved_checks >= self.policy.max_checks
    }

    async fn abort(&mut self, iteration: u64, stats: RunStatistics) -> CtsError {
        error!(iteration, "Bad news persisted, aborting run");
        self.cm.log("Big problems.  Shutting down.");
        match self.cm.tracker_mut().stop_all(None).await {
            Ok(true) => {}
            Ok(false) => warn!("Not every node stopped during abort"),
            Err(e) => warn!(error = %e, "Could not stop nodes during abort"),
        }
        CtsError::RunAborted {
            iteration,
            reason: format!(
                "bad news on {} consecutive checks",
                self.policy.max_checks
            ),
            statistics: Box::new(stats),
        }
    }

    fn log_results(&self, stats: &RunStatistics) {
        let a = &stats.aggregate;
        self.cm.log("Overall Results");
        self.cm.log(&format!(
            "  success: {} failure: {} bad-news: {} audit-failure: {}",
            a.success, a.failure, a.bad_news, a.audit_failure
        ));
        self.cm.log("Detailed Results");
        for (name, counts) in &stats.per_test {
            self.cm.log(&format!(
                "  Test {}: success: {} failure: {} bad-news: {} audit-failure: {}",
                name, counts.success, counts.failure, counts.bad_news, counts.audit_failure
            ));
        }
        info!(
            iterations = stats.iterations_completed,
            success = a.success,
            failure = a.failure,
            bad_news = a.bad_news,
            "Run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audits::{standard_audits, StatusAudit};
    use crate::faults::{standard_tests, RereadTest};
    use crate::scenario::{InitClusterManager, ScenarioComponent};
    use crate::test_helpers::{
        AlwaysReachable, FakeCluster, Journal, ScriptedAudit, ScriptedComponent, ScriptedTest,
    };
    use std::sync::Arc;

    fn init_scenario() -> Scenario {
        Scenario::new(vec![Box::new(InitClusterManager::new(Arc::new(AlwaysReachable)))]).unwrap()
    }

    #[tokio::test]
    async fn test_counts_add_up() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(11).await;
        let tests: Vec<Box<dyn FaultTest>> = vec![
            Box::new(ScriptedTest::passing("ok")),
            Box::new(ScriptedTest::failing("nope")),
        ];
        let mut fault_loop =
            FaultInjectionLoop::new(init_scenario(), cm, tests, Vec::new()).unwrap();

        let stats = fault_loop.run(20).await.unwrap();
        assert_eq!(stats.iterations_completed, 20);
        assert_eq!(stats.aggregate.success + stats.aggregate.failure, 20);
        assert_eq!(stats.per_test_invocations(), 20);
        assert_eq!(stats.test("ok").unwrap().failure, 0);
        assert_eq!(stats.test("nope").unwrap().success, 0);
        assert!(cluster.sink().contains("Overall Results"));
    }

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        let mut sequences = Vec::new();
        for _ in 0..2 {
            let cluster = FakeCluster::new(&["n1", "n2", "n3"]);
            let cm = cluster.cluster_manager(42).await;
            let mut fault_loop =
                FaultInjectionLoop::new(init_scenario(), cm, standard_tests(), Vec::new())
                    .unwrap();
            fault_loop.run(10).await.unwrap();
            sequences.push(
                cluster
                    .sink()
                    .lines()
                    .into_iter()
                    .filter(|l| l.starts_with("Running test"))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(sequences[0].len(), 10);
        assert_eq!(sequences[0], sequences[1]);
    }

    #[tokio::test]
    async fn test_inapplicable_tests_are_dropped() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let tests: Vec<Box<dyn FaultTest>> = vec![
            Box::new(ScriptedTest::passing("ok")),
            Box::new(ScriptedTest::passing("never").not_applicable()),
        ];
        let fault_loop = FaultInjectionLoop::new(init_scenario(), cm, tests, Vec::new()).unwrap();
        assert_eq!(fault_loop.test_names(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_no_applicable_tests_is_a_config_error() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let tests: Vec<Box<dyn FaultTest>> =
            vec![Box::new(ScriptedTest::passing("never").not_applicable())];
        let err = FaultInjectionLoop::new(init_scenario(), cm, tests, Vec::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_inapplicable_scenario_is_a_config_error() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let scenario = Scenario::new(vec![Box::new(
            ScriptedComponent::new("x", Journal::default()).not_applicable(),
        ) as Box<dyn ScenarioComponent>])
        .unwrap();
        let err = FaultInjectionLoop::new(scenario, cm, standard_tests(), Vec::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_setup_failure_returns_no_statistics() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let journal = Journal::default();
        let scenario = Scenario::new(vec![
            Box::new(ScriptedComponent::new("a", journal.clone())) as Box<dyn ScenarioComponent>,
            Box::new(ScriptedComponent::new("b", journal.clone()).failing_set_up()),
        ])
        .unwrap();
        let mut fault_loop =
            FaultInjectionLoop::new(scenario, cm, vec![Box::new(RereadTest)], Vec::new()).unwrap();

        let err = fault_loop.run(5).await.unwrap_err();
        assert!(matches!(err, CtsError::ScenarioSetup { index: 1, .. }));
        assert_eq!(journal.entries(), vec!["setup a", "setup b", "teardown a"]);
    }

    #[tokio::test]
    async fn test_audit_failures_are_attributed() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let audits: Vec<Box<dyn Audit>> = vec![Box::new(ScriptedAudit::failing("broken"))];
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            vec![Box::new(ScriptedTest::passing("ok"))],
            audits,
        )
        .unwrap();

        let stats = fault_loop.run(3).await.unwrap();
        // one initial audit plus one per iteration
        assert_eq!(stats.aggregate.audit_failure, 4);
        assert_eq!(stats.test("ok").unwrap().audit_failure, 3);
        assert!(cluster.sink().contains("Audit broken Failed."));
    }

    #[tokio::test]
    async fn test_sustained_bad_news_aborts() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            vec![Box::new(
                ScriptedTest::passing("noisy").logging(&cluster, "heartbeat: Shutting down.", 12),
            )],
            Vec::new(),
        )
        .unwrap();

        let err = fault_loop.run(5).await.unwrap_err();
        match err {
            CtsError::RunAborted {
                iteration,
                statistics,
                ..
            } => {
                assert_eq!(iteration, 1);
                assert_eq!(statistics.iterations_completed, 1);
                assert_eq!(statistics.aggregate.bad_news, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cluster.sink().contains("Big problems.  Shutting down."));
        assert!(!fault_loop.cluster_manager().tracker().is_believed_up("n1"));
        assert!(!fault_loop.cluster_manager().tracker().is_believed_up("n2"));
    }

    #[tokio::test]
    async fn test_transient_bad_news_is_counted_not_fatal() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            vec![Box::new(
                ScriptedTest::passing("blip").logging(&cluster, "heartbeat: Shutting down.", 3),
            )],
            Vec::new(),
        )
        .unwrap();

        let stats = fault_loop.run(4).await.unwrap();
        assert_eq!(stats.aggregate.bad_news, 12);
        assert_eq!(stats.test("blip").unwrap().bad_news, 12);
    }

    #[tokio::test]
    async fn test_bad_news_accumulates_without_reset() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            vec![Box::new(
                ScriptedTest::passing("blip").logging(&cluster, "heartbeat: Shutting down.", 3),
            )],
            Vec::new(),
        )
        .unwrap()
        .with_policy(BadNewsPolicy {
            reset_on_clean: false,
            ..BadNewsPolicy::default()
        });

        let err = fault_loop.run(10).await.unwrap_err();
        assert!(matches!(err, CtsError::RunAborted { iteration: 4, .. }));
    }

    #[tokio::test]
    async fn test_harness_lines_are_not_bad_news() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(1).await;
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            vec![Box::new(
                ScriptedTest::passing("self").logging(&cluster, "x CTS: Shutting down.", 2),
            )],
            standard_audits(),
        )
        .unwrap();

        let stats = fault_loop.run(3).await.unwrap();
        assert_eq!(stats.aggregate.bad_news, 0);
    }

    #[tokio::test]
    async fn test_status_audit_in_loop_passes_on_healthy_cluster() {
        let cluster = FakeCluster::new(&["n1", "n2"]);
        let cm = cluster.cluster_manager(9).await;
        let mut fault_loop = FaultInjectionLoop::new(
            init_scenario(),
            cm,
            standard_tests(),
            vec![Box::new(StatusAudit)],
        )
        .unwrap();

        let stats = fault_loop.run(15).await.unwrap();
        assert_eq!(stats.aggregate.audit_failure, 0);
        assert_eq!(stats.aggregate.failure, 0);
    }
}
