//! Node reset mechanisms
//!
//! A reset power-cycles a node out from under the cluster manager. The lab
//! holds exactly one mechanism; [`NoReset`] disables reset-based tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{ResetKind, ResetSettings};
use crate::error::{CtsError, CtsResult};

#[async_trait]
pub trait ResetMechanism: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this mechanism can actually reset anything
    fn is_available(&self) -> bool {
        true
    }

    /// Power-cycle `node`; `Ok(false)` means the device reported failure
    async fn reset(&self, node: &str) -> CtsResult<bool>;
}

/// Build the mechanism described by the lab file
pub fn from_settings(settings: &ResetSettings) -> Box<dyn ResetMechanism> {
    match settings.kind {
        ResetKind::None => Box::new(NoReset),
        ResetKind::Stonith => Box::new(StonithReset::new(
            settings.path.clone(),
            settings.device_type.clone(),
            settings.params.clone(),
        )),
    }
}

/// Resets through a stonith device
///
/// Runs `<path> -t <type> -p <params> <node>` locally; exit status 0 is
/// success.
#[derive(Debug, Clone)]
pub struct StonithReset {
    path: PathBuf,
    device_type: String,
    params: String,
}

impl StonithReset {
    pub fn new(path: impl Into<PathBuf>, device_type: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_type: device_type.into(),
            params: params.into(),
        }
    }
}

#[async_trait]
impl ResetMechanism for StonithReset {
    fn name(&self) -> &str {
        "stonith"
    }

    async fn reset(&self, node: &str) -> CtsResult<bool> {
        debug!(node, device = %self.device_type, "Resetting node");
        let status = Command::new(&self.path)
            .arg("-t")
            .arg(&self.device_type)
            .arg("-p")
            .arg(&self.params)
            .arg(node)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| CtsError::process(self.path.display().to_string(), e.to_string()))?;

        if !status.success() {
            warn!(node, status = ?status.code(), "Stonith reset failed");
        }
        Ok(status.success())
    }
}

/// No reset hardware in this lab
#[derive(Debug, Clone, Default)]
pub struct NoReset;

#[async_trait]
impl ResetMechanism for NoReset {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn reset(&self, node: &str) -> CtsResult<bool> {
        Err(CtsError::NotApplicable {
            what: format!("reset of {} (no reset mechanism configured)", node),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_reset_is_not_applicable() {
        let reset = from_settings(&ResetSettings::default());
        assert!(!reset.is_available());
        assert!(reset.reset("n1").await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_stonith_exit_status() {
        // `true`/`false` ignore their arguments
        assert!(StonithReset::new("true", "baytech", "x").reset("n1").await.unwrap());
        assert!(!StonithReset::new("false", "baytech", "x").reset("n1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stonith_missing_binary() {
        let reset = StonithReset::new("/no/such/stonith", "baytech", "x");
        assert!(matches!(reset.reset("n1").await, Err(CtsError::Process { .. })));
    }
}
