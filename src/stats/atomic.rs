//! Atomic viewer counters, one set per running task.
//!
//! Viewer loops on many tokio tasks bump these without mutex contention;
//! the orchestrator's monitor loop reads them to drive adjustment passes
//! and to persist `current_viewers`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters for one task's viewer fleet.
#[derive(Debug, Default)]
pub struct TaskCounters {
    /// Viewers currently attached (watch loop running).
    active_viewers: AtomicI64,
    /// Total viewer loops ever started for this task.
    viewers_started: AtomicU64,
    /// Per-viewer retry attempts consumed.
    retries: AtomicU64,
    /// Viewers dropped after exhausting their retries.
    dropped: AtomicU64,
}

impl TaskCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewer_attached(&self) {
        self.active_viewers.fetch_add(1, Ordering::Relaxed);
        self.viewers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn viewer_detached(&self) {
        self.active_viewers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> i64 {
        self.active_viewers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TaskCountersSnapshot {
        TaskCountersSnapshot {
            active_viewers: self.active_viewers.load(Ordering::Relaxed),
            viewers_started: self.viewers_started.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of a task's counters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCountersSnapshot {
    pub active_viewers: i64,
    pub viewers_started: u64,
    pub retries: u64,
    pub dropped: u64,
}
