//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Events accepted into the queue and events dropped, by reason
//! - **Persistence**: Records persisted, rows written, storage failures by stage
//! - **Queue**: Current queue depth
//! - **Latency**: Storage round-trip duration
//!
//! Recording before [`init_metrics`] is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::event::{EventKind, Table};

// =============================================================================
// Exporter
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and serve scrapes on `listen`.
///
/// The HTTP listener runs as a task on the current tokio runtime. Only the
/// first call installs.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new().with_http_listener(listen).install()?;

    let _ = INSTALLED.set(());
    register_metrics();
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_recorder_events_enqueued_total",
        "Events accepted into the persistence queue"
    );
    describe_counter!(
        "market_recorder_events_dropped_total",
        "Events dropped before reaching storage, by reason"
    );
    describe_counter!(
        "market_recorder_records_persisted_total",
        "Records committed to storage"
    );
    describe_counter!(
        "market_recorder_rows_written_total",
        "Rows committed to storage by table"
    );
    describe_counter!(
        "market_recorder_storage_failures_total",
        "Records dropped after a storage failure, by stage"
    );
    describe_gauge!(
        "market_recorder_queue_depth",
        "Records waiting in the persistence queue"
    );
    describe_histogram!(
        "market_recorder_persist_seconds",
        "Storage round-trip time per record"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reason an event never reached storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Queue at capacity.
    QueueFull,
    /// Vendor event failed validation.
    Invalid,
    /// Queue already closed.
    Closed,
    /// Pipeline not in the running state.
    NotRunning,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Invalid => "invalid",
            Self::Closed => "closed",
            Self::NotRunning => "not_running",
        }
    }
}

/// Record an event accepted into the queue.
pub fn record_enqueued(kind: EventKind) {
    counter!(
        "market_recorder_events_enqueued_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a dropped event.
pub fn record_dropped(kind: EventKind, reason: DropReason) {
    counter!(
        "market_recorder_events_dropped_total",
        "kind" => kind.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a committed record and its rows.
pub fn record_persisted(kind: EventKind, table: Table, rows: usize) {
    counter!(
        "market_recorder_records_persisted_total",
        "kind" => kind.as_str()
    )
    .increment(1);
    counter!(
        "market_recorder_rows_written_total",
        "table" => table.as_str()
    )
    .increment(rows as u64);
}

/// Record a record lost to a storage failure.
pub fn record_storage_failure(kind: EventKind, stage: &'static str) {
    counter!(
        "market_recorder_storage_failures_total",
        "kind" => kind.as_str(),
        "stage" => stage
    )
    .increment(1);
}

/// Update the queue depth gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("market_recorder_queue_depth").set(depth as f64);
}

/// Record storage round-trip duration.
pub fn record_persist_duration(kind: EventKind, duration: Duration) {
    histogram!(
        "market_recorder_persist_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::QueueFull.as_str(), "queue_full");
        assert_eq!(DropReason::Invalid.as_str(), "invalid");
        assert_eq!(DropReason::Closed.as_str(), "closed");
        assert_eq!(DropReason::NotRunning.as_str(), "not_running");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_enqueued(EventKind::Quote);
        record_dropped(EventKind::Trade, DropReason::QueueFull);
        record_persisted(EventKind::Depth, Table::Depths, 5);
        record_storage_failure(EventKind::Quote, "commit");
        set_queue_depth(3);
        record_persist_duration(EventKind::Trade, Duration::from_millis(2));
    }
}
