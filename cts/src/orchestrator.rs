use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use cts_core::audits::{audits_named, standard_audits, Audit};
use cts_core::config::{env_overrides, LabConfig};
use cts_core::faults::{standard_tests, tests_named, FaultTest};
use cts_core::scenario::{InitClusterManager, PingFlood, PingProbe, TruncateLogs};
use cts_core::{
    ClusterConfig, ClusterManager, ClusterManagerDriver, CtsError, CtsResult, DriverRegistry,
    FaultInjectionLoop, Lab, RunStatistics, Scenario, ScenarioComponent, SshExecutor,
};

/// Scenario component names accepted in a lab file
pub const COMPONENT_NAMES: &[&str] = &["truncate-logs", "init", "ping-flood"];

/// Every driver this binary knows about
pub fn driver_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::default();
    cts_heartbeat::register(&mut registry);
    registry
}

/// Read a lab file and apply command-line replacements
pub fn load_lab_config(
    path: &Path,
    iterations: Option<u64>,
    seed: Option<u64>,
) -> CtsResult<LabConfig> {
    let mut config = LabConfig::from_file(path)?;
    if let Some(iterations) = iterations {
        config.iterations = iterations;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

/// Driver defaults, then the lab's `[cluster]` table, then `CTS_*`
/// environment variables, then `--set` overrides
pub fn cluster_config(
    driver: &dyn ClusterManagerDriver,
    lab: &LabConfig,
    extra: &[(String, String)],
) -> CtsResult<ClusterConfig> {
    let mut overrides = lab.cluster_overrides();
    overrides.extend(env_overrides());
    overrides.extend(extra.iter().cloned());
    driver.default_config().build_with_overrides(overrides)
}

/// Build the scenario named by the lab file, in order
pub fn scenario_from_names(names: &[String]) -> CtsResult<Scenario> {
    let components = names
        .iter()
        .map(|name| -> CtsResult<Box<dyn ScenarioComponent>> {
            match name.as_str() {
                "truncate-logs" => Ok(Box::new(TruncateLogs)),
                "init" => Ok(Box::new(InitClusterManager::new(Arc::new(PingProbe::default())))),
                "ping-flood" => Ok(Box::new(PingFlood::new())),
                other => Err(CtsError::configuration(
                    "lab.scenario.components",
                    format!(
                        "unknown component '{}'; known components: {}",
                        other,
                        COMPONENT_NAMES.join(", ")
                    ),
                )),
            }
        })
        .collect::<CtsResult<Vec<_>>>()?;
    Scenario::new(components)
}

fn select_tests(lab: &LabConfig) -> CtsResult<Vec<Box<dyn FaultTest>>> {
    match &lab.tests {
        Some(names) => tests_named(names),
        None => Ok(standard_tests()),
    }
}

fn select_audits(lab: &LabConfig) -> CtsResult<Vec<Box<dyn Audit>>> {
    match &lab.audits {
        Some(names) => audits_named(names),
        None => Ok(standard_audits()),
    }
}

/// What `cts run --json` prints
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub driver: &'a str,
    pub cluster: &'a str,
    pub aborted: bool,
    pub statistics: &'a RunStatistics,
}

/// Assembles a lab, driver, scenario, tests and audits into a runnable loop
pub struct CtsOrchestrator {
    fault_loop: FaultInjectionLoop,
    iterations: u64,
}

impl CtsOrchestrator {
    pub async fn new(lab_config: &LabConfig, extra_overrides: &[(String, String)]) -> CtsResult<Self> {
        let registry = driver_registry();
        let driver = registry.get(&lab_config.driver)?;
        tracing::info!("Creating cluster test orchestrator with driver: {}", driver.name());

        let config = cluster_config(driver.as_ref(), lab_config, extra_overrides)?;
        let scenario = scenario_from_names(&lab_config.scenario.components)?;
        let tests = select_tests(lab_config)?;
        let audits = select_audits(lab_config)?;

        let lab = Lab::from_config(lab_config).await?;
        let executor = Arc::new(SshExecutor::from_settings(&lab_config.remote));
        let cm = ClusterManager::new(Arc::new(lab), driver, config, executor);

        let fault_loop = FaultInjectionLoop::new(scenario, cm, tests, audits)?;
        tracing::info!(
            "Orchestrator ready: {} iterations over tests {:?}",
            lab_config.iterations,
            fault_loop.test_names()
        );

        Ok(Self {
            fault_loop,
            iterations: lab_config.iterations,
        })
    }

    pub fn cluster_manager(&self) -> &ClusterManager {
        self.fault_loop.cluster_manager()
    }

    pub fn test_names(&self) -> Vec<&str> {
        self.fault_loop.test_names()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub async fn run(&mut self) -> CtsResult<RunStatistics> {
        self.fault_loop.run(self.iterations).await
    }

    pub fn report<'a>(&'a self, statistics: &'a RunStatistics, aborted: bool) -> RunReport<'a> {
        let cm = self.fault_loop.cluster_manager();
        RunReport {
            driver: cm.driver().name(),
            cluster: cm.name(),
            aborted,
            statistics,
        }
    }
}
