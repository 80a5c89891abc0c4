//! Persistence worker.
//!
//! The single consumer of the pipeline queue. Each dequeued record is
//! written in its own transaction; storage calls run on the blocking pool
//! so a slow database never stalls the runtime. A failed record is logged,
//! counted, and dropped, and the worker moves on.
//!
//! Shutdown arrives one of two ways: the sentinel reaches the front of the
//! queue, or the drain token fires when the sentinel could not be queued.
//! Both close the queue and persist everything still buffered. Only the
//! cancel token abandons records.
//!
//! Connection reuse is bounded by `records_per_connection`: the worker takes
//! up to that many buffered records and writes them through one connection,
//! opening a fresh one after any failure. With the default of 1 every record
//! gets its own connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{Dequeued, QueueItem, QueueReceiver};
use super::stats::Shared;
use crate::application::ports::{ConnectionFactory, StorageConnection, StorageError};
use crate::domain::event::{EventKind, EventRecord, Table};
use crate::infrastructure::metrics;

/// Worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Maximum wait for a record before re-checking cancellation.
    pub poll_interval: Duration,
    /// Records written through one connection before it is closed.
    pub records_per_connection: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            records_per_connection: 1,
        }
    }
}

/// What happened to the records the worker dequeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Records committed.
    pub persisted: u64,
    /// Rows committed across all tables.
    pub rows_written: u64,
    /// Records dropped after a storage failure.
    pub failed: u64,
    /// Records left in the queue when the worker was cancelled.
    pub abandoned: u64,
}

/// Result of writing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Committed with this many rows.
    Persisted {
        /// Rows written.
        rows: usize,
    },
    /// Dropped after this failure.
    Failed(StorageError),
}

/// Owns an open connection and closes it on drop.
struct ConnectionGuard {
    conn: Option<Box<dyn StorageConnection>>,
}

impl ConnectionGuard {
    fn open(factory: &dyn ConnectionFactory) -> Result<Self, StorageError> {
        Ok(Self {
            conn: Some(factory.open()?),
        })
    }

    fn write(&mut self, record: &EventRecord) -> Result<usize, StorageError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(StorageError::Connect("connection already released".to_string()));
        };

        let batch = record.to_rows();
        let result = conn
            .execute_insert(&batch)
            .and_then(|rows| conn.commit().map(|()| rows));

        if result.is_err()
            && let Err(e) = conn.rollback()
        {
            warn!(error = %e, symbol = record.symbol(), "Rollback after failed write also failed");
        }
        result
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(e) = conn.close()
        {
            warn!(error = %e, "Failed to close storage connection");
        }
    }
}

/// Write `records` in order, one transaction each, reusing a connection
/// until a write fails.
///
/// Blocking. Never fails as a whole: each record gets its own outcome.
pub fn persist_batch(
    factory: &dyn ConnectionFactory,
    records: Vec<EventRecord>,
) -> Vec<(EventKind, PersistOutcome)> {
    let mut current: Option<ConnectionGuard> = None;

    records
        .into_iter()
        .map(|record| {
            let kind = record.kind();
            let started = Instant::now();

            let result = match current.take() {
                Some(guard) => Ok(guard),
                None => ConnectionGuard::open(factory),
            }
            .and_then(|mut guard| {
                let rows = guard.write(&record)?;
                current = Some(guard);
                Ok(rows)
            });

            metrics::record_persist_duration(kind, started.elapsed());

            let outcome = match result {
                Ok(rows) => {
                    metrics::record_persisted(kind, Table::for_kind(kind), rows);
                    debug!(symbol = record.symbol(), kind = %kind, rows, "Record persisted");
                    PersistOutcome::Persisted { rows }
                }
                Err(e) => {
                    metrics::record_storage_failure(kind, e.stage());
                    error!(
                        symbol = record.symbol(),
                        kind = %kind,
                        stage = e.stage(),
                        error = %e,
                        record = ?record,
                        "Failed to persist record, dropping it"
                    );
                    PersistOutcome::Failed(e)
                }
            };
            (kind, outcome)
        })
        .collect()
}

/// Shutdown signals shared between the controller and the worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerSignals {
    /// Drain and exit.
    pub(crate) drain: CancellationToken,
    /// Exit now, abandoning buffered records.
    pub(crate) cancel: CancellationToken,
}

/// Consumes the queue until shutdown.
pub struct PersistenceWorker {
    receiver: QueueReceiver<QueueItem>,
    factory: Arc<dyn ConnectionFactory>,
    signals: WorkerSignals,
    settings: WorkerSettings,
    shared: Arc<Shared>,
}

impl PersistenceWorker {
    pub(crate) fn new(
        receiver: QueueReceiver<QueueItem>,
        factory: Arc<dyn ConnectionFactory>,
        signals: WorkerSignals,
        settings: WorkerSettings,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            receiver,
            factory,
            signals,
            settings,
            shared,
        }
    }

    /// Run until the shutdown sentinel is processed, a drain is requested,
    /// the queue closes, or the worker is cancelled.
    pub async fn run(mut self) -> WorkerReport {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            records_per_connection = self.settings.records_per_connection,
            "Persistence worker started"
        );
        let mut report = WorkerReport::default();

        loop {
            if self.signals.cancel.is_cancelled() {
                self.abandon_remaining(&mut report);
                break;
            }
            if self.signals.drain.is_cancelled() {
                debug!("Drain requested without sentinel");
                self.drain(&mut report).await;
                break;
            }

            let next = tokio::select! {
                () = self.signals.cancel.cancelled() => continue,
                () = self.signals.drain.cancelled() => continue,
                next = self.receiver.dequeue(self.settings.poll_interval) => next,
            };

            match next {
                Dequeued::Empty => {}
                Dequeued::Closed => {
                    debug!("Queue closed, worker exiting");
                    break;
                }
                Dequeued::Item(QueueItem::Shutdown) => {
                    self.drain(&mut report).await;
                    break;
                }
                Dequeued::Item(QueueItem::Record(record)) => {
                    let (batch, shutdown) = self.take_batch(record);
                    self.persist(batch, &mut report).await;
                    if shutdown {
                        self.drain(&mut report).await;
                        break;
                    }
                }
            }
        }

        info!(
            persisted = report.persisted,
            rows = report.rows_written,
            failed = report.failed,
            abandoned = report.abandoned,
            "Persistence worker stopped"
        );
        report
    }

    /// Close the queue and persist everything still buffered.
    async fn drain(&mut self, report: &mut WorkerReport) {
        self.receiver.close();
        let pending = self.receiver.len();
        if pending > 0 {
            info!(pending, "Draining queue before shutdown");
        }

        loop {
            if self.signals.cancel.is_cancelled() {
                self.abandon_remaining(report);
                return;
            }
            match self.receiver.try_dequeue() {
                Dequeued::Item(QueueItem::Record(record)) => {
                    let (batch, _) = self.take_batch(record);
                    self.persist(batch, report).await;
                }
                Dequeued::Item(QueueItem::Shutdown) => {}
                Dequeued::Empty | Dequeued::Closed => return,
            }
        }
    }

    /// Collect up to `records_per_connection` records starting with `first`.
    /// The flag reports whether the shutdown sentinel was reached.
    fn take_batch(&mut self, first: EventRecord) -> (Vec<EventRecord>, bool) {
        let limit = self.settings.records_per_connection.max(1);
        let mut batch = Vec::with_capacity(limit);
        batch.push(first);

        while batch.len() < limit {
            match self.receiver.try_dequeue() {
                Dequeued::Item(QueueItem::Record(record)) => batch.push(record),
                Dequeued::Item(QueueItem::Shutdown) => return (batch, true),
                Dequeued::Empty | Dequeued::Closed => break,
            }
        }
        (batch, false)
    }

    async fn persist(&self, batch: Vec<EventRecord>, report: &mut WorkerReport) {
        let count = batch.len() as u64;
        let factory = Arc::clone(&self.factory);

        match tokio::task::spawn_blocking(move || persist_batch(factory.as_ref(), batch)).await {
            Ok(outcomes) => {
                for (_, outcome) in outcomes {
                    match outcome {
                        PersistOutcome::Persisted { rows } => {
                            report.persisted += 1;
                            report.rows_written += rows as u64;
                            self.shared.stats.increment_persisted();
                        }
                        PersistOutcome::Failed(_) => {
                            report.failed += 1;
                            self.shared.stats.increment_failed();
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, records = count, "Storage task panicked, dropping records");
                report.failed += count;
                for _ in 0..count {
                    self.shared.stats.increment_failed();
                }
            }
        }

        metrics::set_queue_depth(self.receiver.len());
    }

    fn abandon_remaining(&mut self, report: &mut WorkerReport) {
        self.receiver.close();
        let mut abandoned = 0;
        while let Dequeued::Item(item) = self.receiver.try_dequeue() {
            if matches!(item, QueueItem::Record(_)) {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "Worker cancelled, abandoning queued records");
        }
        report.abandoned += abandoned;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::super::queue::bounded;
    use super::*;
    use crate::application::ports::MockConnectionFactory;
    use crate::domain::event::{EventPayload, TradeDirection, TradeTick};
    use crate::infrastructure::storage::InMemoryStorage;

    fn trade(symbol: &str, price: &str) -> EventRecord {
        EventRecord::received_now(
            symbol,
            EventPayload::Trade(vec![TradeTick {
                price: Decimal::from_str(price).unwrap(),
                volume: 100,
                trade_type: String::new(),
                direction: TradeDirection::Up,
            }]),
        )
        .unwrap()
    }

    fn spawn_worker(
        storage: &InMemoryStorage,
        capacity: usize,
        settings: WorkerSettings,
    ) -> (
        super::super::queue::QueueSender<QueueItem>,
        WorkerSignals,
        Arc<Shared>,
        tokio::task::JoinHandle<WorkerReport>,
    ) {
        let (tx, rx) = bounded(capacity).unwrap();
        let signals = WorkerSignals::default();
        let shared = Arc::new(Shared::default());
        let worker = PersistenceWorker::new(
            rx,
            Arc::new(storage.clone()),
            signals.clone(),
            settings,
            Arc::clone(&shared),
        );
        (tx, signals, shared, tokio::spawn(worker.run()))
    }

    #[test]
    fn persist_batch_reuses_one_connection() {
        let storage = InMemoryStorage::new();

        let records = vec![trade("A", "1"), trade("B", "2"), trade("C", "3")];
        let outcomes = persist_batch(&storage, records);

        assert!(outcomes.iter().all(|(_, o)| matches!(o, PersistOutcome::Persisted { rows: 1 })));
        assert_eq!(storage.connections_opened(), 1);
        assert_eq!(storage.connections_closed(), 1);
        assert_eq!(storage.commits(), 3);
    }

    #[test]
    fn failed_commit_drops_record_and_reopens() {
        let storage = InMemoryStorage::new();
        storage.fail_next_commits(1);

        let outcomes = persist_batch(&storage, vec![trade("A", "1"), trade("B", "2")]);

        assert!(matches!(outcomes[0].1, PersistOutcome::Failed(StorageError::Commit(_))));
        assert_eq!(outcomes[1].1, PersistOutcome::Persisted { rows: 1 });
        assert_eq!(storage.connections_opened(), 2);
        assert_eq!(storage.connections_closed(), 2);
        let symbols: Vec<_> = storage.trades().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, vec!["B"]);
    }

    #[test]
    fn open_failure_is_reported_per_record() {
        let mut factory = MockConnectionFactory::new();
        factory
            .expect_open()
            .times(2)
            .returning(|| Err(StorageError::Connect("database unreachable".into())));

        let outcomes = persist_batch(&factory, vec![trade("A", "1"), trade("B", "2")]);

        assert_eq!(outcomes.len(), 2);
        for (kind, outcome) in outcomes {
            assert_eq!(kind, EventKind::Trade);
            assert!(matches!(outcome, PersistOutcome::Failed(StorageError::Connect(_))));
        }
    }

    #[tokio::test]
    async fn sentinel_drains_everything_queued_before_it() {
        let storage = InMemoryStorage::new();
        let (tx, _cancel, shared, handle) = spawn_worker(&storage, 16, WorkerSettings::default());

        for i in 0..5 {
            tx.enqueue(QueueItem::Record(trade("AAPL", &format!("{i}")))).unwrap();
        }
        tx.enqueue(QueueItem::Shutdown).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.persisted, 5);
        assert_eq!(report.abandoned, 0);
        assert_eq!(shared.stats.snapshot().persisted, 5);

        let prices: Vec<_> = storage.trades().into_iter().map(|t| t.price).collect();
        let expected: Vec<_> = (0..5).map(Decimal::from).collect();
        assert_eq!(prices, expected);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn storage_failure_does_not_stop_the_worker() {
        let storage = InMemoryStorage::new();
        storage.fail_next_inserts(1);
        let (tx, _cancel, shared, handle) = spawn_worker(&storage, 16, WorkerSettings::default());

        for price in ["1", "2", "3"] {
            tx.enqueue(QueueItem::Record(trade("AAPL", price))).unwrap();
        }
        tx.enqueue(QueueItem::Shutdown).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.persisted, 2);
        assert_eq!(shared.stats.snapshot().failed, 1);
        assert_eq!(storage.connections_opened(), storage.connections_closed());
    }

    #[tokio::test]
    async fn batched_connections_close_after_limit() {
        let storage = InMemoryStorage::new();
        let settings = WorkerSettings {
            records_per_connection: 4,
            ..WorkerSettings::default()
        };
        let (tx, _cancel, _stats, handle) = spawn_worker(&storage, 16, settings);

        for i in 0..8 {
            tx.enqueue(QueueItem::Record(trade("AAPL", &format!("{i}")))).unwrap();
        }
        tx.enqueue(QueueItem::Shutdown).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.persisted, 8);
        assert!(storage.connections_opened() <= 8);
        assert_eq!(storage.connections_opened(), storage.connections_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_observes_cancellation() {
        let storage = InMemoryStorage::new();
        let settings = WorkerSettings {
            poll_interval: Duration::from_millis(100),
            ..WorkerSettings::default()
        };
        let (_tx, signals, _stats, handle) = spawn_worker(&storage, 4, settings);

        tokio::time::sleep(Duration::from_millis(250)).await;
        signals.cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, WorkerReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_queued_records() {
        let storage = InMemoryStorage::new();
        let settings = WorkerSettings {
            poll_interval: Duration::from_millis(50),
            ..WorkerSettings::default()
        };
        let (tx, rx) = bounded(8).unwrap();
        let signals = WorkerSignals::default();
        signals.cancel.cancel();
        for price in ["1", "2", "3"] {
            tx.enqueue(QueueItem::Record(trade("AAPL", price))).unwrap();
        }

        let worker = PersistenceWorker::new(
            rx,
            Arc::new(storage.clone()),
            signals,
            settings,
            Arc::new(Shared::default()),
        );
        let report = worker.run().await;

        assert_eq!(report.abandoned, 3);
        assert_eq!(storage.row_count(), 0);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn drain_signal_persists_buffered_records_without_sentinel() {
        let storage = InMemoryStorage::new();
        let (tx, rx) = bounded(4).unwrap();
        for price in ["1", "2", "3", "4"] {
            tx.enqueue(QueueItem::Record(trade("AAPL", price))).unwrap();
        }
        let signals = WorkerSignals::default();
        signals.drain.cancel();

        let worker = PersistenceWorker::new(
            rx,
            Arc::new(storage.clone()),
            signals,
            WorkerSettings::default(),
            Arc::new(Shared::default()),
        );
        let report = worker.run().await;

        assert_eq!(report.persisted, 4);
        assert_eq!(report.abandoned, 0);
        let prices: Vec<_> = storage.trades().into_iter().map(|t| t.price).collect();
        assert_eq!(prices, (1..=4).map(Decimal::from).collect::<Vec<_>>());
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_wakes_on_drain_signal() {
        let storage = InMemoryStorage::new();
        let settings = WorkerSettings {
            poll_interval: Duration::from_secs(60),
            ..WorkerSettings::default()
        };
        let (_tx, signals, _stats, handle) = spawn_worker(&storage, 4, settings);

        tokio::task::yield_now().await;
        signals.drain.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, WorkerReport::default());
    }
}
