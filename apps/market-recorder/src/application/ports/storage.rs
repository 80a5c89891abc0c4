//! Storage port.
//!
//! The persistence worker depends only on these traits. Calls are
//! synchronous; the worker runs them on the blocking thread pool.

use crate::domain::event::{RowBatch, Table};

/// Failure of a single storage round-trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Connection could not be opened.
    #[error("failed to open storage connection: {0}")]
    Connect(String),

    /// Row insert failed.
    #[error("insert into {table} failed: {message}")]
    Insert {
        /// Destination table.
        table: Table,
        /// Backend error message.
        message: String,
    },

    /// Commit failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Rollback failed.
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Connection close failed.
    #[error("failed to close storage connection: {0}")]
    Close(String),
}

impl StorageError {
    /// Stage label used in logs and metrics.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Insert { .. } => "insert",
            Self::Commit(_) => "commit",
            Self::Rollback(_) => "rollback",
            Self::Close(_) => "close",
        }
    }
}

/// An open storage connection, owned by exactly one thread at a time.
///
/// Inserts are transactional: nothing is visible until [`commit`] succeeds.
///
/// [`commit`]: StorageConnection::commit
pub trait StorageConnection: Send {
    /// Insert all rows of a batch into its table. Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Insert`] if any row is rejected.
    fn execute_insert(&mut self, batch: &RowBatch) -> Result<usize, StorageError>;

    /// Commit pending inserts.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Commit`] if the backend refuses the commit.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discard pending inserts.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Rollback`] on backend failure.
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Close`] on backend failure.
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// Opens storage connections.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connect`] if the backend is unreachable.
    fn open(&self) -> Result<Box<dyn StorageConnection>, StorageError>;
}
