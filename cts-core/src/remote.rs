//! Remote command execution
//!
//! The harness never talks to cluster nodes directly; it issues shell commands
//! through a [`RemoteExecutor`]. The production implementation wraps ssh and
//! applies a bounded [`RetryPolicy`]; tests substitute a scripted executor.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::defaults::*;
use crate::config::RemoteSettings;
use crate::error::{CtsError, CtsResult};

/// Runs shell commands on named nodes
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `node` and return its exit status
    ///
    /// An `Err` means the command could not be issued at all.
    async fn run(&self, node: &str, command: &str) -> CtsResult<i32>;

    /// Run `command` on `node` and return the first line of its stdout
    ///
    /// The line has its trailing newline removed; an empty string means the
    /// command printed nothing.
    async fn run_and_capture_line(&self, node: &str, command: &str) -> CtsResult<String>;
}

/// Bounded retry applied to every remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_REMOTE_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

/// Remote executor built on an ssh-like program
///
/// Commands are issued as `<program> <args…> <node> <command>`, so the
/// remote side sees `command` as a single shell string.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    args: Vec<String>,
    retry: RetryPolicy,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(
            DEFAULT_REMOTE_PROGRAM,
            DEFAULT_REMOTE_ARGS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl SshExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(settings: &RemoteSettings) -> Self {
        Self::new(settings.program.clone(), settings.args.clone()).with_retry(RetryPolicy {
            attempts: settings.attempts,
            delay: Duration::ZERO,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn command(&self, node: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(node).arg(command).stdin(Stdio::null());
        cmd
    }

    async fn run_once(&self, node: &str, command: &str) -> CtsResult<i32> {
        let status = self
            .command(node, command)
            .status()
            .await
            .map_err(|e| CtsError::remote(node, command, format!("spawn {}: {}", self.program, e)))?;
        // killed by a signal counts as a transport failure
        Ok(status.code().unwrap_or(SSH_TRANSPORT_FAILURE))
    }

    async fn capture_once(&self, node: &str, command: &str) -> CtsResult<(String, i32)> {
        let mut child = self
            .command(node, command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CtsError::remote(node, command, format!("spawn {}: {}", self.program, e)))?;

        let mut line = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            reader.read_line(&mut line).await?;
            // drain the rest so the child never blocks on a full pipe
            let mut rest = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut rest).await?;
        }
        let status = child.wait().await?;

        let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
        Ok((trimmed, status.code().unwrap_or(SSH_TRANSPORT_FAILURE)))
    }

    async fn pause(&self) {
        if !self.retry.delay.is_zero() {
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn run(&self, node: &str, command: &str) -> CtsResult<i32> {
        let attempts = self.retry.attempts.max(1);
        let mut last = Err(CtsError::remote(node, command, "no attempt made"));

        for attempt in 1..=attempts {
            last = self.run_once(node, command).await;
            match &last {
                Ok(0) => return last,
                Ok(rc) => debug!(attempt, rc, "Remote command returned non-zero"),
                Err(e) => debug!(attempt, error = %e, "Remote command could not be issued"),
            }
            if attempt < attempts {
                warn!(node, command, attempt, "Retrying remote command");
                self.pause().await;
            }
        }
        last
    }

    #[instrument(skip(self), fields(program = %self.program))]
    async fn run_and_capture_line(&self, node: &str, command: &str) -> CtsResult<String> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = CtsError::remote(node, command, "no attempt made");

        for attempt in 1..=attempts {
            match self.capture_once(node, command).await {
                Ok((line, rc)) if rc != SSH_TRANSPORT_FAILURE => return Ok(line),
                Ok((_, rc)) => {
                    last_err = CtsError::remote(node, command, format!("transport failure (exit {})", rc));
                }
                Err(e) => last_err = e,
            }
            if attempt < attempts {
                warn!(node, command, attempt, "Retrying remote capture");
                self.pause().await;
            }
        }
        Err(last_err)
    }
}
