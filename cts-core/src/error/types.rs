//! Core error types for the cluster test system

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::stats::RunStatistics;

/// Error type for every fallible harness operation
#[derive(Error, Debug)]
pub enum CtsError {
    // Configuration Errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Invalid pattern '{pattern}' in {component}: {source}")]
    InvalidPattern {
        component: String,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("Unknown node: {node}")]
    UnknownNode { node: String },

    #[error("Not applicable: {what}")]
    NotApplicable { what: String },

    // Remote & Process Errors
    #[error("Remote command on {node} failed: {command}: {details}")]
    RemoteExecution {
        node: String,
        command: String,
        details: String,
    },

    #[error("Process '{program}' failed: {details}")]
    Process { program: String, details: String },

    // Log Watching
    #[error("Log watch on {} failed: {details}", .path.display())]
    LogWatch { path: PathBuf, details: String },

    // Run Lifecycle
    #[error("Scenario setup failed at component {index} ({component})")]
    ScenarioSetup { component: String, index: usize },

    #[error("Run aborted at iteration {iteration}: {reason}")]
    RunAborted {
        iteration: u64,
        reason: String,
        statistics: Box<RunStatistics>,
    },

    #[error("Test '{test}' failed: {reason}")]
    TestFailed { test: String, reason: String },

    #[error("Audit '{audit}' failed: {reason}")]
    AuditFailed { audit: String, reason: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // System Errors
    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Multiple Errors
    #[error("Multiple errors in {context}: {}", format_errors(.errors))]
    Multiple {
        context: String,
        errors: Vec<CtsError>,
    },
}

// Helper function to format multiple errors
pub fn format_errors(errors: &[CtsError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for CtsError {
    fn from(err: std::io::Error) -> Self {
        CtsError::IoError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CtsError>;
pub type CtsResult<T> = std::result::Result<T, CtsError>;
