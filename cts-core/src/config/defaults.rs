//! Default configuration values for the cluster test system
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Cluster manager timing defaults
pub const DEFAULT_DEAD_TIME_SECS: u64 = 30;
pub const DEFAULT_START_TIME_SECS: u64 = 90;
pub const DEFAULT_STATUS_STOPPED_MARKER: &str = "stopped";

// Log watching defaults
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WATCH_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_HARNESS_MARKER: &str = " CTS: ";
pub const DEFAULT_LOG_SOURCE_TAG: &str = "CTS";
pub const LOG_TIME_FORMAT: &str = "%Y/%m/%d_%H:%M:%S";

// Fault loop defaults
pub const DEFAULT_BAD_NEWS_CHECKS: usize = 10;
pub const DEFAULT_ITERATIONS: u64 = 5000;

// Remote execution defaults
pub const DEFAULT_REMOTE_PROGRAM: &str = "/usr/bin/ssh";
pub const DEFAULT_REMOTE_ARGS: &[&str] = &["-l", "root", "-n", "-x"];
pub const DEFAULT_REMOTE_ATTEMPTS: u32 = 3;
/// Exit status ssh reports when the connection itself failed
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

// Reset defaults
pub const DEFAULT_STONITH_PATH: &str = "/usr/sbin/stonith";
pub const DEFAULT_STONITH_TYPE: &str = "baytech";
pub const DEFAULT_STONITH_PARAMS: &str = "10.10.10.100 admin admin";

// Scenario defaults
pub const DEFAULT_PING_SIZE: u32 = 1024;
pub const DEFAULT_BOOT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BOOT_SETTLE_SECS: u64 = 30;
pub const MIN_LAB_NODES: usize = 2;

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
