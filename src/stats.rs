//! Process-wide request counters.
//!
//! Incremented from polling workers, LLM calls, and admin handlers
//! concurrently, so everything is atomic.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct RequestStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    api_calls: AtomicU64,
    start_time: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// Point-in-time snapshot for the dashboard and debug APIs.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "successfulRequests")]
    pub successful_requests: u64,
    #[serde(rename = "failedRequests")]
    pub failed_requests: u64,
    #[serde(rename = "apiCalls")]
    pub api_calls: u64,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "uptimeSecs")]
    pub uptime_secs: u64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            start_time: Instant::now(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One outbound LLM provider call.
    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            start_time: self.started_at.to_rfc3339(),
            uptime_secs: self.uptime_secs(),
        }
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident set size of this process in bytes, 0 if unavailable.
pub fn memory_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss_pages) = statm.split_whitespace().nth(1) {
                if let Ok(pages) = rss_pages.parse::<u64>() {
                    return pages * 4096;
                }
            }
        }
    }
    0
}
