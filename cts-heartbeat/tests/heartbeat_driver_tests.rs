use std::io::Write;
use std::sync::Arc;

use cts_core::audits::{Audit, ResourceAudit};
use cts_core::test_helpers::FakeCluster;
use cts_core::{ClusterManagerDriver, DriverRegistry};
use cts_heartbeat::HeartbeatDriver;
use tempfile::NamedTempFile;

fn haresources(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_registers_alongside_generic() {
    let mut registry = DriverRegistry::default();
    cts_heartbeat::register(&mut registry);

    assert_eq!(registry.list_available_drivers(), vec!["generic", "heartbeat"]);
    let driver = registry.get("heartbeat").unwrap();
    assert_eq!(driver.name(), "heartbeat");
}

#[test]
fn test_overrides_replace_defaults() {
    let config = HeartbeatDriver::new()
        .default_config()
        .build_with_overrides([("dead_time", "\"12s\""), ("log_file", "/tmp/ha-log")])
        .unwrap();
    assert_eq!(config.dead_time, std::time::Duration::from_secs(12));
    assert_eq!(config.log_file, std::path::PathBuf::from("/tmp/ha-log"));
    assert_eq!(config.start_cmd, "/usr/lib/heartbeat/heartbeat ");
}

#[tokio::test]
async fn test_resource_groups_from_file() {
    let file = haresources("node1 10.0.0.50 httpd\nnode2 nfs # shared storage\n");
    let driver = HeartbeatDriver::new().with_resource_file(file.path());

    let groups = cts_core::ClusterManagerDriver::resource_groups(&driver)
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].to_string(), "[{IPaddr::10.0.0.50}, {httpd}]");
}

#[tokio::test]
async fn test_resource_audit_probes_through_executor() {
    // the fake executor answers probe scripts with an empty line, which
    // never matches, so no resource appears to run anywhere
    let file = haresources("node1 httpd\n");
    let cluster = FakeCluster::new(&["n1", "n2"]);
    let driver = Arc::new(HeartbeatDriver::new().with_resource_file(file.path()));
    let mut cm = cluster.cluster_manager_with_driver(7, driver).await;

    ResourceAudit.check(&cm).await.unwrap();

    cm.tracker_mut().start("n1").await.unwrap();
    let err = ResourceAudit.check(&cm).await.unwrap_err();
    assert!(err.to_string().contains("{httpd} is not running anywhere"));
}
