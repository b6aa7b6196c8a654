//! Run logger — the logging capability handed to the engine
//!
//! The engine never reaches for a process-wide logger; it writes through a
//! `RunLogger` passed in by the host. Every line carries the id of the job
//! that produced it. `TracingLogger` forwards to `tracing`, where the host's
//! subscriber handles rotation and persistence.

use std::sync::Mutex;
use tracing::Level;

/// Sink for engine log lines
pub trait RunLogger: Send + Sync {
    /// Record one line for the job `job_id`
    fn log(&self, level: Level, job_id: &str, message: &str);
}

/// Forwards log lines to `tracing` events with a `job_id` field
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl RunLogger for TracingLogger {
    fn log(&self, level: Level, job_id: &str, message: &str) {
        match level {
            Level::ERROR => tracing::error!(job_id = %job_id, "{}", message),
            Level::WARN => tracing::warn!(job_id = %job_id, "{}", message),
            Level::INFO => tracing::info!(job_id = %job_id, "{}", message),
            Level::DEBUG => tracing::debug!(job_id = %job_id, "{}", message),
            _ => tracing::trace!(job_id = %job_id, "{}", message),
        }
    }
}

/// A captured log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub job_id: String,
    pub message: String,
}

/// Captures log lines in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of captured lines, oldest first
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any captured message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.message.contains(needle))
    }
}

impl RunLogger for MemoryLogger {
    fn log(&self, level: Level, job_id: &str, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(LogLine {
                level,
                job_id: job_id.to_string(),
                message: message.to_string(),
            });
        }
    }
}

impl<T: RunLogger + ?Sized> RunLogger for std::sync::Arc<T> {
    fn log(&self, level: Level, job_id: &str, message: &str) {
        (**self).log(level, job_id, message)
    }
}
