//! Constructor methods and convenience functions for CtsError

use std::path::Path;

use super::types::CtsError;

impl CtsError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use cts_core::error::CtsError;
    ///
    /// let err = CtsError::configuration("cluster.start_cmd", "must not be empty");
    /// assert!(err.is_configuration());
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        CtsError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid pattern error for a regex that failed to compile
    pub fn invalid_pattern(
        component: impl Into<String>,
        pattern: impl Into<String>,
        source: regex::Error,
    ) -> Self {
        CtsError::InvalidPattern {
            component: component.into(),
            pattern: pattern.into(),
            source: Box::new(source),
        }
    }

    /// Create a remote execution error
    pub fn remote(
        node: impl Into<String>,
        command: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        CtsError::RemoteExecution {
            node: node.into(),
            command: command.into(),
            details: details.into(),
        }
    }

    pub fn process(program: impl Into<String>, details: impl Into<String>) -> Self {
        CtsError::Process {
            program: program.into(),
            details: details.into(),
        }
    }

    /// Create a log watch error for the given file
    pub fn log_watch(path: &Path, details: impl Into<String>) -> Self {
        CtsError::LogWatch {
            path: path.to_path_buf(),
            details: details.into(),
        }
    }

    pub fn test_failed(test: impl Into<String>, reason: impl Into<String>) -> Self {
        CtsError::TestFailed {
            test: test.into(),
            reason: reason.into(),
        }
    }

    pub fn audit_failed(audit: impl Into<String>, reason: impl Into<String>) -> Self {
        CtsError::AuditFailed {
            audit: audit.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CtsError::Internal {
            message: message.into(),
        }
    }

    /// Whether this error should have been caught before a run started
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CtsError::ConfigurationError { .. }
                | CtsError::InvalidPattern { .. }
                | CtsError::UnknownNode { .. }
                | CtsError::NotApplicable { .. }
        )
    }

    /// Whether this error ended a run early
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            CtsError::ScenarioSetup { .. } | CtsError::RunAborted { .. }
        )
    }
}
