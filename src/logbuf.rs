//! Bounded diagnostic log ring.
//!
//! Every service mirrors its user-facing warnings and errors here so the
//! UI layer can show a live activity feed without scraping tracing
//! output. Append-only, capped at the last 50 entries.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warning,
    Error,
    /// Device permission denied; surfaced distinctly so the UI can
    /// prompt the user instead of showing a generic failure.
    Permission,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
}

/// Shareable handle to the ring. Clones refer to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct StreamingLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl StreamingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == LOG_CAPACITY {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogKind::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogKind::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogKind::Error, message);
    }

    pub fn permission(&self, message: impl Into<String>) {
        self.push(LogKind::Permission, message);
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
