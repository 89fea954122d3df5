//! Fixed-capacity log ring, dumped to disk on process exit.
//!
//! The ring holds the most recent entries (default 100), overwriting
//! oldest-first. A dump preserves chronological order regardless of wrap
//! position and carries a fixed header: reason, timestamp, pid, entry
//! count.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
}

#[derive(Debug)]
pub struct RingLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl RingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, component: &str, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Write the buffer to `worker-log-<ISO8601-with-dashes>.log` under
    /// `dir`. Best-effort side channel; callers log and move on if it
    /// fails.
    pub fn dump(&self, dir: &Path, reason: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let path = dir.join(format!("worker-log-{stamp}.log"));
        let mut file = File::create(&path)?;

        writeln!(file, "=== NoteVox worker log dump ===")?;
        writeln!(file, "reason: {reason}")?;
        writeln!(file, "timestamp: {}", Utc::now().to_rfc3339())?;
        writeln!(file, "pid: {}", std::process::id())?;
        writeln!(file, "entries: {}", self.entries.len())?;
        writeln!(file)?;

        for entry in &self.entries {
            writeln!(
                file,
                "[{}] {} {}: {}",
                entry.timestamp.to_rfc3339(),
                entry.level,
                entry.component,
                entry.message
            )?;
        }
        Ok(path)
    }
}
