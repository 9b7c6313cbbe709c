//! Worker processes that consume events, plus their shared observability.

pub mod http;
pub mod notifier;
pub mod recurring;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// In-process counters shared between a worker loop and its health endpoint.
///
/// All counters are `AtomicU64` incremented inline — no external library.
#[derive(Debug)]
pub struct WorkerCounters {
    /// Events handled successfully (delivered / observed / published).
    pub processed: AtomicU64,
    /// Events whose handling failed. Failed events are dropped, not retried.
    pub failed: AtomicU64,
    /// Events of a type this worker does not handle.
    pub ignored: AtomicU64,
    /// Redelivered events suppressed by the dedupe window.
    pub deduped: AtomicU64,
    /// Publishes that fell back to degraded transport.
    pub degraded: AtomicU64,
    /// Worker start time — used to calculate uptime.
    pub started_at: Instant,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            deduped: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deduped(&self) {
        self.deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Render counters in Prometheus text format, labelled per service.
    pub fn render_prometheus(&self, service: &str) -> String {
        let snap = self.snapshot();
        format!(
            "# HELP taskd_uptime_seconds Worker uptime in seconds.\n\
             # TYPE taskd_uptime_seconds gauge\n\
             taskd_uptime_seconds{{service=\"{service}\"}} {}\n\
             # HELP taskd_events_processed_total Events handled successfully.\n\
             # TYPE taskd_events_processed_total counter\n\
             taskd_events_processed_total{{service=\"{service}\"}} {}\n\
             # HELP taskd_events_failed_total Events whose handling failed.\n\
             # TYPE taskd_events_failed_total counter\n\
             taskd_events_failed_total{{service=\"{service}\"}} {}\n\
             # HELP taskd_events_ignored_total Events of an unhandled type.\n\
             # TYPE taskd_events_ignored_total counter\n\
             taskd_events_ignored_total{{service=\"{service}\"}} {}\n\
             # HELP taskd_events_deduped_total Redelivered events suppressed.\n\
             # TYPE taskd_events_deduped_total counter\n\
             taskd_events_deduped_total{{service=\"{service}\"}} {}\n\
             # HELP taskd_publish_degraded_total Publishes on degraded transport.\n\
             # TYPE taskd_publish_degraded_total counter\n\
             taskd_publish_degraded_total{{service=\"{service}\"}} {}\n",
            snap.uptime_secs,
            snap.processed,
            snap.failed,
            snap.ignored,
            snap.deduped,
            snap.degraded,
        )
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub ignored: u64,
    pub deduped: u64,
    pub degraded: u64,
    pub uptime_secs: u64,
}

/// Shared handle — cheaply clonable.
pub type SharedCounters = Arc<WorkerCounters>;
