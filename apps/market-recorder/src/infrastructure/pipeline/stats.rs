//! Pipeline counters shared by the ingestion side and the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::lifecycle::PipelineState;

/// Running totals for one pipeline instance.
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    dropped_full: AtomicU64,
    dropped_invalid: AtomicU64,
    dropped_closed: AtomicU64,
    dropped_not_running: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped_full(&self) {
        self.dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped_invalid(&self) {
        self.dropped_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped_closed(&self) {
        self.dropped_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped_not_running(&self) {
        self.dropped_not_running.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            dropped_not_running: self.dropped_not_running.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records accepted into the queue.
    pub submitted: u64,
    /// Records rejected because the queue was full.
    pub dropped_full: u64,
    /// Vendor events rejected by validation.
    pub dropped_invalid: u64,
    /// Records rejected because the queue was closed.
    pub dropped_closed: u64,
    /// Records rejected because the pipeline was not running.
    pub dropped_not_running: u64,
    /// Records committed to storage.
    pub persisted: u64,
    /// Records lost to storage failures.
    pub failed: u64,
}

impl StatsSnapshot {
    /// Total records dropped before reaching the queue.
    #[must_use]
    pub const fn total_dropped(&self) -> u64 {
        self.dropped_full + self.dropped_invalid + self.dropped_closed + self.dropped_not_running
    }
}

/// State shared between the controller and every ingest handle.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: RwLock<PipelineState>,
    pub(crate) stats: PipelineStats,
}
