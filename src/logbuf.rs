//! In-memory log buffer feeding the admin debug API.
//!
//! Bounded ring of structured events, newest first. Writers append from
//! polling workers and API handlers concurrently; readers take a filtered
//! snapshot at the moment of the call.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum entries retained; the oldest entry is dropped past this.
const MAX_ENTRIES: usize = 1_000;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warning,
    Success,
    Info,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "WARNING" | "WARN" => Some(Self::Warning),
            "SUCCESS" => Some(Self::Success),
            "INFO" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Subsystem that produced a log event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    Server,
    Bot,
    Api,
    Auth,
    Database,
    Telegram,
    Settings,
    Support,
}

impl LogCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SERVER" => Some(Self::Server),
            "BOT" => Some(Self::Bot),
            "API" => Some(Self::Api),
            "AUTH" => Some(Self::Auth),
            "DATABASE" => Some(Self::Database),
            "TELEGRAM" => Some(Self::Telegram),
            "SETTINGS" => Some(Self::Settings),
            "SUPPORT" => Some(Self::Support),
            _ => None,
        }
    }
}

/// One structured log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Process-wide bounded log ring.
pub struct LogBuffer {
    entries: RwLock<VecDeque<LogEntry>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(MAX_ENTRIES)),
        }
    }

    /// Insert an entry at the front, evicting the oldest when full.
    pub fn append(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        details: Option<String>,
    ) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            category,
            message: message.into(),
            details,
        };

        let mut entries = self.entries.write();
        if entries.len() >= MAX_ENTRIES {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>) {
        self.append(LogLevel::Error, category, message, None);
    }

    pub fn warning(&self, category: LogCategory, message: impl Into<String>) {
        self.append(LogLevel::Warning, category, message, None);
    }

    pub fn success(&self, category: LogCategory, message: impl Into<String>) {
        self.append(LogLevel::Success, category, message, None);
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>) {
        self.append(LogLevel::Info, category, message, None);
    }

    /// Snapshot of up to `limit` matching entries, newest first.
    pub fn read(
        &self,
        limit: usize,
        level: Option<LogLevel>,
        category: Option<LogCategory>,
    ) -> Vec<LogEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| level.map_or(true, |l| e.level == l))
            .filter(|e| category.map_or(true, |c| e.category == c))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of entries matching the filter.
    pub fn count(&self, level: Option<LogLevel>, category: Option<LogCategory>) -> usize {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| level.map_or(true, |l| e.level == l))
            .filter(|e| category.map_or(true, |c| e.category == c))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
