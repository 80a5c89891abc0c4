//! Ingestion pipeline.
//!
//! Decouples the feed's delivery threads from storage latency:
//!
//! ```text
//! feed callback ──try_send──▶ bounded queue ──recv──▶ persistence worker ──▶ storage
//! ```
//!
//! Callbacks never wait on storage. When the queue is full new events are
//! dropped and counted; queued events are never overwritten.

mod controller;
mod ingest;
mod queue;
mod stats;
mod worker;

pub use controller::{PipelineController, PipelineError, PipelineSettings};
pub use ingest::{IngestHandle, SubmitError};
pub use queue::{
    Dequeued, EnqueueError, QueueError, QueueItem, QueueReceiver, QueueSender, bounded,
};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{PersistOutcome, PersistenceWorker, WorkerReport, WorkerSettings, persist_batch};
