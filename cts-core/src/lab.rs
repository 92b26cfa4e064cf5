//! The lab: machines under test and the shared run environment
//!
//! A [`Lab`] is validated once when it is built. Node names are resolved to
//! addresses at registration, so a typo in the lab file fails before any
//! cluster manager is touched.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::defaults::*;
use crate::config::LabConfig;
use crate::error::{CtsError, CtsResult};
use crate::logging::{FileSink, LogFanout, LogSink, StderrSink, TracingSink};
use crate::reset::{self, NoReset, ResetMechanism};

/// A machine under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub address: IpAddr,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Tunables shared by scenario components and tests
#[derive(Debug, Clone)]
pub struct LabSettings {
    pub ping_size: u32,
    pub reset_tests_enabled: bool,
    pub boot_timeout: Duration,
    pub watch_poll_interval: Duration,
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            ping_size: DEFAULT_PING_SIZE,
            reset_tests_enabled: false,
            boot_timeout: duration_secs(DEFAULT_BOOT_TIMEOUT_SECS),
            watch_poll_interval: duration_ms(DEFAULT_WATCH_POLL_INTERVAL_MS),
        }
    }
}

pub struct Lab {
    nodes: Vec<Node>,
    log: LogFanout,
    reset: Arc<dyn ResetMechanism>,
    seed: u64,
    settings: LabSettings,
}

impl fmt::Debug for Lab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lab")
            .field("nodes", &self.nodes)
            .field("log", &self.log)
            .field("reset", &self.reset.name())
            .field("seed", &self.seed)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Lab {
    pub fn builder() -> LabBuilder {
        LabBuilder::default()
    }

    /// Build a lab from a validated lab file
    pub async fn from_config(config: &LabConfig) -> CtsResult<Self> {
        let mut builder = Lab::builder()
            .reset(Arc::from(reset::from_settings(&config.reset)))
            .settings(LabSettings {
                ping_size: config.scenario.ping_size,
                reset_tests_enabled: config.reset_tests,
                boot_timeout: config.scenario.boot_timeout,
                watch_poll_interval: config.scenario.watch_poll_interval,
            });

        for node in &config.nodes {
            builder = builder.node(node.clone());
        }
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }
        if config.logging.tracing {
            builder = builder.sink(Arc::new(TracingSink));
        }
        if config.logging.stderr {
            builder = builder.sink(Arc::new(StderrSink));
        }
        if let Some(path) = &config.logging.file {
            builder = builder.sink(Arc::new(FileSink::with_tag(
                path,
                config.logging.source_tag.clone(),
            )?));
        }

        builder.build().await
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn node(&self, name: &str) -> CtsResult<&Node> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| CtsError::UnknownNode {
                node: name.to_string(),
            })
    }

    pub fn is_valid_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    /// Pick a node uniformly at random
    pub fn random_node<R: Rng + ?Sized>(&self, rng: &mut R) -> &Node {
        // a built lab always has at least MIN_LAB_NODES nodes
        let index = rng.gen_range(0..self.nodes.len());
        &self.nodes[index]
    }

    /// Power-cycle a node through the lab's reset mechanism
    pub async fn reset_node(&self, name: &str) -> CtsResult<bool> {
        self.node(name)?;
        self.reset.reset(name).await
    }

    pub fn reset_mechanism(&self) -> &dyn ResetMechanism {
        self.reset.as_ref()
    }

    pub fn log(&self, line: &str) {
        self.log.log(line);
    }

    pub fn log_fanout(&self) -> &LogFanout {
        &self.log
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A fresh generator seeded from the run seed
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    pub fn settings(&self) -> &LabSettings {
        &self.settings
    }
}

enum NodeEntry {
    Resolve(String),
    Fixed(String, IpAddr),
}

/// Builder for [`Lab`]
#[derive(Default)]
pub struct LabBuilder {
    nodes: Vec<NodeEntry>,
    sinks: Vec<Arc<dyn LogSink>>,
    reset: Option<Arc<dyn ResetMechanism>>,
    seed: Option<u64>,
    settings: LabSettings,
}

impl LabBuilder {
    /// Register a node whose address is resolved at build time
    pub fn node(mut self, name: impl Into<String>) -> Self {
        self.nodes.push(NodeEntry::Resolve(name.into()));
        self
    }

    /// Register a node with a known address
    pub fn node_with_address(mut self, name: impl Into<String>, address: IpAddr) -> Self {
        self.nodes.push(NodeEntry::Fixed(name.into(), address));
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn reset(mut self, reset: Arc<dyn ResetMechanism>) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn settings(mut self, settings: LabSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn build(self) -> CtsResult<Lab> {
        if self.nodes.len() < MIN_LAB_NODES {
            return Err(CtsError::configuration(
                "lab.nodes",
                format!(
                    "at least {} nodes are required, got {}",
                    MIN_LAB_NODES,
                    self.nodes.len()
                ),
            ));
        }

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for entry in self.nodes {
            let node = match entry {
                NodeEntry::Fixed(name, address) => Node { name, address },
                NodeEntry::Resolve(name) => {
                    let address = resolve(&name).await?;
                    Node { name, address }
                }
            };
            if !seen.insert(node.name.clone()) {
                return Err(CtsError::configuration(
                    "lab.nodes",
                    format!("node '{}' listed twice", node.name),
                ));
            }
            nodes.push(node);
        }

        let log = LogFanout::new(self.sinks)?;

        let seed = match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::rngs::OsRng.next_u64();
                log.log(&format!("Random seed is: {}", seed));
                seed
            }
        };

        info!(nodes = nodes.len(), seed, "Lab ready");

        Ok(Lab {
            nodes,
            log,
            reset: self.reset.unwrap_or_else(|| Arc::new(NoReset)),
            seed,
            settings: self.settings,
        })
    }
}

async fn resolve(name: &str) -> CtsResult<IpAddr> {
    let mut addrs = tokio::net::lookup_host((name, 0)).await.map_err(|e| {
        CtsError::configuration("lab.nodes", format!("cannot resolve node '{}': {}", name, e))
    })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            CtsError::configuration("lab.nodes", format!("node '{}' has no address", name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingSink;
    use std::net::Ipv4Addr;

    fn local(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
    }

    #[tokio::test]
    async fn test_needs_two_nodes() {
        let err = Lab::builder()
            .node_with_address("solo", local(1))
            .sink(Arc::new(RecordingSink::new()))
            .build()
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_needs_a_sink() {
        let err = Lab::builder()
            .node_with_address("a", local(1))
            .node_with_address("b", local(2))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("log sink"));
    }

    #[tokio::test]
    async fn test_resolves_localhost() {
        let lab = Lab::builder()
            .node("localhost")
            .node_with_address("b", local(2))
            .sink(Arc::new(RecordingSink::new()))
            .seed(1)
            .build()
            .await
            .unwrap();
        assert!(lab.node("localhost").unwrap().address.is_loopback());
    }

    #[tokio::test]
    async fn test_random_seed_is_logged() {
        let sink = Arc::new(RecordingSink::new());
        let lab = Lab::builder()
            .node_with_address("a", local(1))
            .node_with_address("b", local(2))
            .sink(sink.clone())
            .build()
            .await
            .unwrap();
        assert!(sink.contains(&format!("Random seed is: {}", lab.seed())));
    }

    #[tokio::test]
    async fn test_reset_unknown_node_rejected() {
        let lab = Lab::builder()
            .node_with_address("a", local(1))
            .node_with_address("b", local(2))
            .sink(Arc::new(RecordingSink::new()))
            .seed(3)
            .build()
            .await
            .unwrap();

        assert!(matches!(
            lab.reset_node("ghost").await,
            Err(CtsError::UnknownNode { .. })
        ));
        assert!(lab.is_valid_node("a"));
        assert!(!lab.is_valid_node("ghost"));
    }

    #[tokio::test]
    async fn test_same_seed_same_choices() {
        let lab = Lab::builder()
            .node_with_address("a", local(1))
            .node_with_address("b", local(2))
            .node_with_address("c", local(3))
            .sink(Arc::new(RecordingSink::new()))
            .seed(42)
            .build()
            .await
            .unwrap();

        let mut first = lab.rng();
        let mut second = lab.rng();
        let a: Vec<_> = (0..20).map(|_| lab.random_node(&mut first).name.clone()).collect();
        let b: Vec<_> = (0..20).map(|_| lab.random_node(&mut second).name.clone()).collect();
        assert_eq!(a, b);
    }
}
