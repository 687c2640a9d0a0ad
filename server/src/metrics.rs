// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stream_core::session::SessionState;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Mark the process start for uptime reporting. Later calls are no-ops.
pub fn mark_start() {
    let _ = START_TIME.get_or_init(Instant::now);
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get().map(|start| start.elapsed().as_secs()).unwrap_or(0)
}

/// Stream lifecycle counters
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    pub requests: Arc<AtomicU64>,
    pub rejected: Arc<AtomicU64>,
    pub spawn_failures: Arc<AtomicU64>,
    pub started: Arc<AtomicU64>,
    pub active: Arc<AtomicU64>,
    pub completed: Arc<AtomicU64>,
    pub aborted: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub bytes_relayed: Arc<AtomicU64>,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            spawn_failures: Arc::new(AtomicU64::new(0)),
            started: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            aborted: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            bytes_relayed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Generator could not be started or never produced output.
    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_finished(&self, state: SessionState, bytes: u64) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.bytes_relayed.fetch_add(bytes, Ordering::Relaxed);
        let counter = match state {
            SessionState::Completed => &self.completed,
            SessionState::Aborted => &self.aborted,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsResponse {
        StreamMetricsResponse {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub streams: StreamMetricsResponse,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StreamMetricsResponse {
    pub requests: u64,
    pub rejected: u64,
    pub spawn_failures: u64,
    pub started: u64,
    pub active: u64,
    pub completed: u64,
    pub aborted: u64,
    pub failed: u64,
    pub bytes_relayed: u64,
}

pub fn collect_system_metrics() -> SystemMetrics {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    // Average across all cores
    let cpu_usage = system.global_cpu_info().cpu_usage();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        uptime_seconds: uptime_seconds(),
        system_load: load_average(),
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|loadavg| loadavg.split_whitespace().next().and_then(|s| s.parse().ok()))
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}
