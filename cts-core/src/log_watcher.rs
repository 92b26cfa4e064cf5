//! Log file watcher
//!
//! Tails a single, continuously appended log file in the manner of `tail -f`
//! and reports the first new line matching any of a set of patterns.
//!
//! Usage:
//! 1. Construct a [`LogWatcher`] with the file and patterns
//! 2. [`arm`](LogWatcher::arm) it where watching should start
//! 3. [`poll`](LogWatcher::poll) for matches
//!
//! Every complete line is examined at most once between two `arm` calls. A
//! trailing line without its newline is held back until it is complete.
//!
//! In-place truncation is detected by comparing the file size with the size
//! seen at the previous check and with the read offset; the watcher then
//! re-arms from the start of the file and keeps the remaining poll budget.
//! Rename-and-recreate rotation is not detected.

use regex::Regex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::defaults::*;
use crate::error::{CtsError, CtsResult};

pub struct LogWatcher {
    path: PathBuf,
    patterns: Vec<Regex>,
    timeout: Duration,
    poll_interval: Duration,
    state: Option<WatchState>,
}

struct WatchState {
    reader: BufReader<File>,
    /// Bytes consumed from the file, including any held-back partial line
    offset: u64,
    /// File size at the previous check
    last_size: u64,
    partial: Vec<u8>,
}

impl std::fmt::Debug for LogWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWatcher")
            .field("path", &self.path)
            .field("patterns", &self.patterns.iter().map(Regex::as_str).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("offset", &self.state.as_ref().map(|s| s.offset))
            .finish()
    }
}

impl LogWatcher {
    /// Create a watcher over `path` for the given patterns
    ///
    /// Fails with a configuration error if the pattern list is empty, any
    /// pattern does not compile, or the file cannot be opened for reading.
    pub fn new<I, S>(path: impl Into<PathBuf>, patterns: I) -> CtsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = path.into();
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).map_err(|e| CtsError::invalid_pattern("log_watcher", p, e))
            })
            .collect::<CtsResult<Vec<_>>>()?;

        if patterns.is_empty() {
            return Err(CtsError::configuration(
                "log_watcher",
                "at least one pattern is required",
            ));
        }

        std::fs::File::open(&path).map_err(|e| {
            CtsError::configuration(
                "log_watcher",
                format!("File [{}] not accessible (r): {}", path.display(), e),
            )
        })?;

        Ok(Self {
            path,
            patterns,
            timeout: duration_secs(DEFAULT_WATCH_TIMEOUT_SECS),
            poll_interval: duration_ms(DEFAULT_WATCH_POLL_INTERVAL_MS),
            state: None,
        })
    }

    /// Default budget for [`poll`](Self::poll) when none is given
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep between checks when no new data is available
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.state.is_some()
    }

    /// Current read offset, `None` before the first `arm`
    pub fn offset(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.offset)
    }

    /// Mark the place to start watching from
    ///
    /// From the end of the file by default, so only lines written after this
    /// call are seen; from the start when `from_beginning` is set.
    pub async fn arm(&mut self, from_beginning: bool) -> CtsResult<()> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| CtsError::log_watch(&self.path, format!("open: {}", e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| CtsError::log_watch(&self.path, format!("stat: {}", e)))?
            .len();

        let mut reader = BufReader::new(file);
        let offset = if from_beginning {
            0
        } else {
            reader
                .seek(SeekFrom::End(0))
                .await
                .map_err(|e| CtsError::log_watch(&self.path, format!("seek: {}", e)))?
        };

        trace!(path = %self.path.display(), offset, size, "Armed log watcher");
        self.state = Some(WatchState {
            reader,
            offset,
            last_size: size,
            partial: Vec::new(),
        });
        Ok(())
    }

    /// Look for the next line matching any pattern
    ///
    /// Scans lines appended since the last consumed line, sleeping between
    /// checks, for at most `timeout` (the watcher's default when `None`). A
    /// zero timeout scans what is already there and returns. Returns the
    /// matching line without its newline, or `None` when the budget runs out.
    pub async fn poll(&mut self, timeout: Option<Duration>) -> CtsResult<Option<String>> {
        if self.state.is_none() {
            return Err(CtsError::log_watch(&self.path, "poll before arm"));
        }

        let budget = timeout.unwrap_or(self.timeout);
        let deadline = Instant::now() + budget;

        loop {
            let size = tokio::fs::metadata(&self.path)
                .await
                .map_err(|e| CtsError::log_watch(&self.path, format!("stat: {}", e)))?
                .len();

            let truncated = match &self.state {
                Some(state) => size < state.last_size || size < state.offset,
                None => false,
            };
            if truncated {
                debug!(path = %self.path.display(), size, "Log truncated, re-arming from start");
                self.arm(true).await?;
                continue;
            }

            if let Some(line) = self.scan_available(size).await? {
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Read complete lines up to the current end of file
    async fn scan_available(&mut self, size: u64) -> CtsResult<Option<String>> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        state.last_size = size;

        while state.offset < size {
            let read = state
                .reader
                .read_until(b'\n', &mut state.partial)
                .await
                .map_err(|e| CtsError::log_watch(&self.path, format!("read: {}", e)))?;
            if read == 0 {
                break;
            }
            state.offset += read as u64;

            if state.partial.last() != Some(&b'\n') {
                // incomplete line at end of file
                break;
            }

            let raw = std::mem::take(&mut state.partial);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            trace!(line, "Examining log line");

            if self.patterns.iter().any(|re| re.is_match(line)) {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }
}
