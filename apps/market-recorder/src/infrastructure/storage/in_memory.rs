//! In-memory storage backend.
//!
//! Transactional like the real backend: rows become visible only on
//! commit. Faults and latency can be injected for pipeline tests and for
//! running the recorder without a database.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::application::ports::{ConnectionFactory, StorageConnection, StorageError};
use crate::domain::event::{DepthRow, QuoteRow, RowBatch, TradeRow};

#[derive(Debug, Default)]
struct StorageState {
    quotes: Vec<QuoteRow>,
    trades: Vec<TradeRow>,
    depths: Vec<DepthRow>,
    fail_opens: u32,
    fail_inserts: u32,
    fail_commits: u32,
    insert_delay: Duration,
    opened: u64,
    closed: u64,
    commits: u64,
}

/// Shared in-memory tables. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<StorageState>>,
}

impl InMemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().fail_opens = count;
    }

    /// Make the next `count` inserts fail.
    pub fn fail_next_inserts(&self, count: u32) {
        self.state.lock().fail_inserts = count;
    }

    /// Make the next `count` commits fail.
    pub fn fail_next_commits(&self, count: u32) {
        self.state.lock().fail_commits = count;
    }

    /// Sleep this long inside every insert.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.state.lock().insert_delay = delay;
    }

    /// Committed quote rows, in commit order.
    #[must_use]
    pub fn quotes(&self) -> Vec<QuoteRow> {
        self.state.lock().quotes.clone()
    }

    /// Committed trade rows, in commit order.
    #[must_use]
    pub fn trades(&self) -> Vec<TradeRow> {
        self.state.lock().trades.clone()
    }

    /// Committed depth rows, in commit order.
    #[must_use]
    pub fn depths(&self) -> Vec<DepthRow> {
        self.state.lock().depths.clone()
    }

    /// Total committed rows across tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        let state = self.state.lock();
        state.quotes.len() + state.trades.len() + state.depths.len()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().opened
    }

    /// Connections closed so far.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.state.lock().closed
    }

    /// Successful commits so far.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }
}

impl ConnectionFactory for InMemoryStorage {
    fn open(&self) -> Result<Box<dyn StorageConnection>, StorageError> {
        let mut state = self.state.lock();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(StorageError::Connect("injected open failure".to_string()));
        }
        state.opened += 1;
        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }
}

struct InMemoryConnection {
    state: Arc<Mutex<StorageState>>,
    pending: Vec<RowBatch>,
}

impl StorageConnection for InMemoryConnection {
    fn execute_insert(&mut self, batch: &RowBatch) -> Result<usize, StorageError> {
        let delay = {
            let mut state = self.state.lock();
            if state.fail_inserts > 0 {
                state.fail_inserts -= 1;
                return Err(StorageError::Insert {
                    table: batch.table(),
                    message: "injected insert failure".to_string(),
                });
            }
            state.insert_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.pending.push(batch.clone());
        Ok(batch.len())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(StorageError::Commit("injected commit failure".to_string()));
        }
        for batch in self.pending.drain(..) {
            match batch {
                RowBatch::Quotes(rows) => state.quotes.extend(rows),
                RowBatch::Trades(rows) => state.trades.extend(rows),
                RowBatch::Depths(rows) => state.depths.extend(rows),
            }
        }
        state.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.pending.clear();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.state.lock().closed += 1;
        Ok(())
    }
}
