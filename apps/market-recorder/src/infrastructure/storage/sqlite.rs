//! SQLite storage backend.
//!
//! One file-backed database with three append-only tables. Decimals and
//! timestamps are stored as text so no precision is lost; the depth
//! timestamp is filled in by the database at insert time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::SecondsFormat;
use rusqlite::{Connection, OpenFlags, params};
use tracing::info;

use crate::application::ports::{ConnectionFactory, StorageConnection, StorageError};
use crate::domain::event::{RowBatch, Table};

const SCHEMA_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    last_done TEXT NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    volume INTEGER NOT NULL,
    turnover TEXT NOT NULL,
    trade_status TEXT NOT NULL,
    current_volume INTEGER NOT NULL,
    current_turnover TEXT NOT NULL,
    ts TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    price TEXT NOT NULL,
    volume INTEGER NOT NULL,
    trade_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    ts TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS depths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    position INTEGER NOT NULL,
    price TEXT NOT NULL,
    volume INTEGER NOT NULL,
    order_count INTEGER NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('ask', 'bid')),
    ts TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_quotes_symbol_ts ON quotes(symbol, ts);
CREATE INDEX IF NOT EXISTS idx_trades_symbol_ts ON trades(symbol, ts);
CREATE INDEX IF NOT EXISTS idx_depths_symbol_ts ON depths(symbol, ts);
";

const INSERT_QUOTE: &str = "INSERT INTO quotes (symbol, last_done, open, high, low, volume, \
     turnover, trade_status, current_volume, current_turnover, ts) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const INSERT_TRADE: &str = "INSERT INTO trades (symbol, price, volume, trade_type, direction, ts) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const INSERT_DEPTH: &str = "INSERT INTO depths (symbol, position, price, volume, order_count, side) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Opens connections to one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnectionFactory {
    /// Factory for the database at `path`.
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory and the tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connect`] if the directory, the file, or the
    /// schema cannot be created.
    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Connect(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = self.connect()?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StorageError::Connect(format!("schema setup failed: {e}")))?;

        info!(path = %self.path.display(), "SQLite schema ready");
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| StorageError::Connect(format!("{}: {e}", self.path.display())))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| StorageError::Connect(e.to_string()))?;
        Ok(conn)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn open(&self) -> Result<Box<dyn StorageConnection>, StorageError> {
        Ok(Box::new(SqliteConnection {
            conn: self.connect()?,
            in_transaction: false,
        }))
    }
}

struct SqliteConnection {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteConnection {
    fn insert_rows(&self, batch: &RowBatch) -> rusqlite::Result<usize> {
        match batch {
            RowBatch::Quotes(rows) => {
                let mut stmt = self.conn.prepare_cached(INSERT_QUOTE)?;
                for row in rows {
                    stmt.execute(params![
                        row.symbol,
                        row.last_done.to_string(),
                        row.open.to_string(),
                        row.high.to_string(),
                        row.low.to_string(),
                        row.volume,
                        row.turnover.to_string(),
                        row.trade_status.as_str(),
                        row.current_volume,
                        row.current_turnover.to_string(),
                        row.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
                    ])?;
                }
            }
            RowBatch::Trades(rows) => {
                let mut stmt = self.conn.prepare_cached(INSERT_TRADE)?;
                for row in rows {
                    stmt.execute(params![
                        row.symbol,
                        row.price.to_string(),
                        row.volume,
                        row.trade_type,
                        row.direction.as_str(),
                        row.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
                    ])?;
                }
            }
            RowBatch::Depths(rows) => {
                let mut stmt = self.conn.prepare_cached(INSERT_DEPTH)?;
                for row in rows {
                    stmt.execute(params![
                        row.symbol,
                        row.position,
                        row.price.to_string(),
                        row.volume,
                        row.order_count,
                        row.side.as_str(),
                    ])?;
                }
            }
        }
        Ok(batch.len())
    }
}

impl StorageConnection for SqliteConnection {
    fn execute_insert(&mut self, batch: &RowBatch) -> Result<usize, StorageError> {
        let table = batch.table();
        let insert_err = |e: rusqlite::Error| StorageError::Insert {
            table,
            message: e.to_string(),
        };

        if !self.in_transaction {
            self.conn.execute_batch("BEGIN").map_err(insert_err)?;
            self.in_transaction = true;
        }
        self.insert_rows(batch).map_err(insert_err)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StorageError::Commit(e.to_string()))?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| StorageError::Rollback(e.to_string()))
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        // an open transaction is rolled back by sqlite on close
        self.conn
            .close()
            .map_err(|(_, e)| StorageError::Close(e.to_string()))
    }
}

/// Count rows in one table. Used by operational checks and tests.
///
/// # Errors
///
/// Returns [`StorageError::Connect`] if the database cannot be read.
pub fn count_rows(factory: &SqliteConnectionFactory, table: Table) -> Result<i64, StorageError> {
    let conn = factory.connect()?;
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.as_str()), [], |row| {
        row.get(0)
    })
    .map_err(|e| StorageError::Connect(e.to_string()))
}
