//! Pipeline lifecycle.
//!
//! [`PipelineController`] owns the queue and the worker task and moves the
//! pipeline through `Created -> Running -> Stopping -> Stopped`. Shutdown
//! is cooperative: a sentinel queued behind pending records tells the worker
//! to drain and exit. If the queue is too full to take the sentinel the
//! worker is told to drain directly. Records are abandoned only when the
//! worker misses the shutdown deadline.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ingest::{IngestHandle, SubmitError};
use super::queue::{self, EnqueueError, QueueError, QueueItem, QueueReceiver, QueueSender};
use super::stats::{Shared, StatsSnapshot};
use super::worker::{PersistenceWorker, WorkerReport, WorkerSettings, WorkerSignals};
use crate::application::ports::ConnectionFactory;
use crate::domain::event::EventRecord;
use crate::domain::lifecycle::PipelineState;

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Worker poll interval.
    pub poll_interval: Duration,
    /// Records written through one connection.
    pub records_per_connection: usize,
    /// Maximum wait for a free slot for the shutdown sentinel.
    pub sentinel_timeout: Duration,
    /// Maximum wait for the worker to drain and exit.
    pub shutdown_timeout: Duration,
    /// Extra wait after cancelling a worker that missed the deadline.
    pub cancel_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            poll_interval: Duration::from_secs(1),
            records_per_connection: 1,
            sentinel_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(2),
        }
    }
}

impl PipelineSettings {
    const fn worker(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: self.poll_interval,
            records_per_connection: self.records_per_connection,
        }
    }
}

/// Controller errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Requested a transition the lifecycle does not allow.
    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: PipelineState,
        /// Requested state.
        to: PipelineState,
    },

    /// Queue could not be created.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A setting that must be non-zero was zero.
    #[error("invalid pipeline setting: {0} must be greater than zero")]
    InvalidSettings(&'static str),

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the persistence worker")]
    NoRuntime,

    /// The worker did not finish within the shutdown timeout and queued
    /// records were abandoned.
    #[error("persistence worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// The worker task panicked.
    #[error("persistence worker failed: {0}")]
    WorkerFailed(String),
}

/// Owns the queue and the persistence worker.
pub struct PipelineController {
    settings: PipelineSettings,
    factory: Arc<dyn ConnectionFactory>,
    sender: QueueSender<QueueItem>,
    receiver: Mutex<Option<QueueReceiver<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<WorkerReport>>>,
    shared: Arc<Shared>,
    signals: WorkerSignals,
    stopped: watch::Sender<bool>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("queue_depth", &self.sender.len())
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Create a pipeline in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Queue`] if the queue capacity is zero, and
    /// [`PipelineError::InvalidSettings`] for a zero poll interval, batch
    /// size, or shutdown timeout.
    pub fn new(
        settings: PipelineSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self, PipelineError> {
        if settings.poll_interval.is_zero() {
            return Err(PipelineError::InvalidSettings("poll_interval"));
        }
        if settings.records_per_connection == 0 {
            return Err(PipelineError::InvalidSettings("records_per_connection"));
        }
        if settings.shutdown_timeout.is_zero() {
            return Err(PipelineError::InvalidSettings("shutdown_timeout"));
        }
        let (sender, receiver) = queue::bounded(settings.queue_capacity)?;
        Ok(Self {
            settings,
            factory,
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            signals: WorkerSignals::default(),
            stopped: watch::Sender::new(false),
        })
    }

    /// Spawn the worker and begin accepting events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] unless the pipeline is
    /// `Created`, and [`PipelineError::NoRuntime`] outside a runtime.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut state = self.shared.state.write();
        if !state.can_transition_to(PipelineState::Running) {
            return Err(PipelineError::InvalidTransition {
                from: *state,
                to: PipelineState::Running,
            });
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let Some(receiver) = self.receiver.lock().take() else {
            return Err(PipelineError::InvalidTransition {
                from: *state,
                to: PipelineState::Running,
            });
        };

        let worker = PersistenceWorker::new(
            receiver,
            Arc::clone(&self.factory),
            self.signals.clone(),
            self.settings.worker(),
            Arc::clone(&self.shared),
        );
        *self.worker.lock() = Some(runtime.spawn(worker.run()));
        *state = PipelineState::Running;

        info!(
            queue_capacity = self.settings.queue_capacity,
            records_per_connection = self.settings.records_per_connection,
            "Ingestion pipeline started"
        );
        Ok(())
    }

    /// Stop accepting events, drain the queue, and wait for the worker.
    ///
    /// Safe to call more than once and from any state. A call made while
    /// another stop is in flight waits for that stop to finish; later calls
    /// return an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShutdownTimeout`] if the worker had to be
    /// cancelled, and [`PipelineError::WorkerFailed`] if it panicked. The
    /// pipeline ends `Stopped` either way.
    pub async fn stop(&self) -> Result<WorkerReport, PipelineError> {
        let in_flight = {
            let mut state = self.shared.state.write();
            let current = *state;
            match current {
                PipelineState::Created => {
                    *state = PipelineState::Stopped;
                    drop(state);
                    drop(self.receiver.lock().take());
                    self.stopped.send_replace(true);
                    info!("Ingestion pipeline stopped before start");
                    return Ok(WorkerReport::default());
                }
                PipelineState::Running => {
                    *state = PipelineState::Stopping;
                    None
                }
                PipelineState::Stopping => Some(self.stopped.subscribe()),
                PipelineState::Stopped => {
                    debug!("Pipeline already stopped");
                    return Ok(WorkerReport::default());
                }
            }
        };
        if let Some(stopped) = in_flight {
            return self.await_stopped(stopped).await;
        }

        let Some(mut handle) = self.worker.lock().take() else {
            self.mark_stopped();
            return Ok(WorkerReport::default());
        };

        info!(
            pending = self.sender.len(),
            "Stopping ingestion pipeline, draining queue"
        );
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;

        match self
            .sender
            .enqueue_timeout(QueueItem::Shutdown, self.settings.sentinel_timeout)
            .await
        {
            Ok(()) => debug!("Shutdown sentinel queued"),
            Err(EnqueueError::Full(_)) => {
                warn!(
                    timeout_ms = self.settings.sentinel_timeout.as_millis(),
                    "Queue stayed full, signalling worker to drain"
                );
                self.signals.drain.cancel();
            }
            Err(EnqueueError::Closed(_)) => debug!("Queue already closed by worker"),
        }

        let result = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => {
                error!(error = %e, "Persistence worker task failed");
                Err(PipelineError::WorkerFailed(e.to_string()))
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.shutdown_timeout.as_secs(),
                    pending = self.sender.len(),
                    "Worker did not drain in time, cancelling"
                );
                self.signals.cancel.cancel();
                match tokio::time::timeout(self.settings.cancel_grace, &mut handle).await {
                    Ok(Ok(report)) => {
                        error!(
                            persisted = report.persisted,
                            abandoned = report.abandoned,
                            "Worker cancelled, queued records abandoned"
                        );
                    }
                    Ok(Err(e)) => error!(error = %e, "Persistence worker task failed"),
                    Err(_) => {
                        error!("Worker ignored cancellation, aborting task");
                        handle.abort();
                    }
                }
                Err(PipelineError::ShutdownTimeout(self.settings.shutdown_timeout))
            }
        };

        self.mark_stopped();
        if let Ok(report) = &result {
            info!(
                persisted = report.persisted,
                failed = report.failed,
                "Ingestion pipeline stopped"
            );
        }
        result
    }

    /// Wait for a stop started by another caller.
    async fn await_stopped(
        &self,
        mut stopped: watch::Receiver<bool>,
    ) -> Result<WorkerReport, PipelineError> {
        debug!("Stop already in progress, waiting for it");
        let bound = self.settings.shutdown_timeout + self.settings.cancel_grace;
        let finished = tokio::time::timeout(bound, stopped.wait_for(|done| *done))
            .await
            .is_ok_and(|changed| changed.is_ok());
        if finished {
            Ok(WorkerReport::default())
        } else {
            Err(PipelineError::ShutdownTimeout(self.settings.shutdown_timeout))
        }
    }

    fn mark_stopped(&self) {
        *self.shared.state.write() = PipelineState::Stopped;
        self.stopped.send_replace(true);
    }

    /// Enqueue a record directly.
    ///
    /// # Errors
    ///
    /// See [`IngestHandle::submit`].
    pub fn submit(&self, record: EventRecord) -> Result<(), SubmitError> {
        self.ingest_handle().submit(record)
    }

    /// Handle for feed callbacks.
    #[must_use]
    pub fn ingest_handle(&self) -> IngestHandle {
        IngestHandle::new(self.sender.clone(), Arc::clone(&self.shared))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.shared.state.read()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Records currently buffered.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.sender.len()
    }

    /// Configured settings.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.state() == PipelineState::Running {
            warn!("Pipeline dropped while running, cancelling worker");
            self.signals.cancel.cancel();
        }
    }
}
