//! Harness log sinks
//!
//! Everything the harness reports about a run goes through a [`LogFanout`],
//! which forwards each line to every registered [`LogSink`]. Internal
//! debugging output uses `tracing` directly; sinks carry the run narrative.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::defaults::{DEFAULT_LOG_SOURCE_TAG, LOG_TIME_FORMAT};
use crate::error::{CtsError, CtsResult};

/// A destination for harness log lines
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    fn emit(&self, line: &str);
}

/// Forwards lines into `tracing` at info level
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn emit(&self, line: &str) {
        tracing::info!(target: "cts", "{}", line);
    }
}

/// Timestamped lines on stderr
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn name(&self) -> &str {
        "stderr"
    }

    fn emit(&self, line: &str) {
        eprintln!("{} {}", Local::now().format(LOG_TIME_FORMAT), line);
    }
}

/// Appends tagged, timestamped lines to a file
///
/// Lines look like `2024/01/31_12:00:00 CTS: Running test Start`, so a
/// file sink pointed at the cluster log marks the harness's own lines with
/// the ` CTS: ` harness marker.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    tag: String,
    file: Mutex<File>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> CtsResult<Self> {
        Self::with_tag(path, DEFAULT_LOG_SOURCE_TAG)
    }

    pub fn with_tag(path: impl Into<PathBuf>, tag: impl Into<String>) -> CtsResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                CtsError::configuration(
                    "logging.file",
                    format!("Cannot open {} for append: {}", path.display(), e),
                )
            })?;
        Ok(Self {
            path,
            tag: tag.into(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn emit(&self, line: &str) {
        let stamped = format!(
            "{} {}: {}\n",
            Local::now().format(LOG_TIME_FORMAT),
            self.tag,
            line
        );
        let mut file = self.file.lock();
        if let Err(e) = file.write_all(stamped.as_bytes()).and_then(|_| file.flush()) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write harness log line");
        }
    }
}

/// Fan-out over one or more sinks
#[derive(Clone)]
pub struct LogFanout {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for LogFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFanout")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

impl LogFanout {
    /// Build a fan-out; at least one sink is required
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> CtsResult<Self> {
        if sinks.is_empty() {
            return Err(CtsError::configuration(
                "logging",
                "at least one log sink must be registered",
            ));
        }
        Ok(Self { sinks })
    }

    pub fn add(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn log(&self, line: &str) {
        for sink in &self.sinks {
            sink.emit(line);
        }
    }

    pub fn log_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.log(line.as_ref());
        }
    }
}
