//! Ingestion callback.
//!
//! [`IngestHandle`] is what the feed client calls. Every method returns
//! promptly and never reports failure to the caller: malformed events,
//! a full queue, or a stopped pipeline all end in a dropped event, a log
//! line, and a counter.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::queue::{EnqueueError, QueueItem, QueueSender};
use super::stats::Shared;
use crate::application::ports::PushHandler;
use crate::domain::event::EventRecord;
use crate::domain::lifecycle::PipelineState;
use crate::domain::push::{PushDepth, PushEvent, PushQuote, PushTrades};
use crate::infrastructure::metrics::{self, DropReason};

/// Rejected submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Pipeline is not accepting events.
    #[error("pipeline is {0}, not accepting events")]
    NotRunning(PipelineState),
    /// Queue is at capacity.
    #[error("persistence queue is full")]
    QueueFull,
    /// Queue has been closed by the worker.
    #[error("persistence queue is closed")]
    Closed,
}

/// Cloneable producer handle given to feed callbacks.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    sender: QueueSender<QueueItem>,
    shared: Arc<Shared>,
}

impl IngestHandle {
    pub(crate) const fn new(sender: QueueSender<QueueItem>, shared: Arc<Shared>) -> Self {
        Self { sender, shared }
    }

    /// Enqueue a record without blocking.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmitError`] when the record was not queued. The record
    /// is dropped in that case.
    pub fn submit(&self, record: EventRecord) -> Result<(), SubmitError> {
        let kind = record.kind();
        let state = *self.shared.state.read();
        if !state.accepts_events() {
            self.shared.stats.increment_dropped_not_running();
            metrics::record_dropped(kind, DropReason::NotRunning);
            return Err(SubmitError::NotRunning(state));
        }

        match self.sender.enqueue(QueueItem::Record(record)) {
            Ok(()) => {
                self.shared.stats.increment_submitted();
                metrics::record_enqueued(kind);
                metrics::set_queue_depth(self.sender.len());
                Ok(())
            }
            Err(EnqueueError::Full(_)) => {
                self.shared.stats.increment_dropped_full();
                metrics::record_dropped(kind, DropReason::QueueFull);
                Err(SubmitError::QueueFull)
            }
            Err(EnqueueError::Closed(_)) => {
                self.shared.stats.increment_dropped_closed();
                metrics::record_dropped(kind, DropReason::Closed);
                Err(SubmitError::Closed)
            }
        }
    }

    /// Feed callback: map a pushed event and enqueue it.
    pub fn on_event(&self, symbol: &str, event: PushEvent) {
        let kind = event.kind();
        let record = match event.into_record(symbol, Utc::now()) {
            Ok(record) => record,
            Err(e) => {
                self.shared.stats.increment_dropped_invalid();
                metrics::record_dropped(kind, DropReason::Invalid);
                warn!(symbol, kind = %kind, error = %e, "Dropping malformed push event");
                return;
            }
        };

        match self.submit(record) {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => {
                warn!(
                    symbol,
                    kind = %kind,
                    capacity = self.sender.capacity(),
                    "Persistence queue full, dropping event"
                );
            }
            Err(SubmitError::NotRunning(state)) => {
                debug!(symbol, kind = %kind, state = %state, "Pipeline not running, dropping event");
            }
            Err(SubmitError::Closed) => {
                debug!(symbol, kind = %kind, "Persistence queue closed, dropping event");
            }
        }
    }

    /// Quote callback.
    pub fn on_quote(&self, symbol: &str, quote: PushQuote) {
        self.on_event(symbol, PushEvent::Quote(quote));
    }

    /// Trades callback.
    pub fn on_trades(&self, symbol: &str, trades: PushTrades) {
        self.on_event(symbol, PushEvent::Trades(trades));
    }

    /// Depth callback.
    pub fn on_depth(&self, symbol: &str, depth: PushDepth) {
        self.on_event(symbol, PushEvent::Depth(depth));
    }

    /// Wrap this handle as a feed callback.
    #[must_use]
    pub fn push_handler(&self) -> PushHandler {
        let handle = self.clone();
        Arc::new(move |symbol: &str, event: PushEvent| handle.on_event(symbol, event))
    }

    /// Records currently buffered.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.sender.len()
    }
}
