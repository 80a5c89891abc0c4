//! Market Event Records
//!
//! Canonical, immutable representation of one pushed market event
//! (quote, trade batch, or order-book depth) as it travels from the
//! feed callback through the queue to the persistence worker.
//!
//! # Invariants
//!
//! - The symbol is never empty.
//! - The kind is derived from the payload, so a quote record can never
//!   carry a trade payload.
//! - `received_at` is the local receive time, not the feed time, and is
//!   what gets persisted as the row timestamp.

mod rows;

pub use rows::{BookSide, DepthRow, QuoteRow, RowBatch, Table, TradeRow};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Kinds
// =============================================================================

/// Event kind, selecting the insert path used by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Real-time quote (last price, OHLC, volume).
    Quote,
    /// One or more executed trades.
    Trade,
    /// Order-book depth (asks and bids).
    Depth,
}

impl EventKind {
    /// Get all event kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Quote, Self::Trade, Self::Depth]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
            Self::Depth => "depth",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payload Types
// =============================================================================

/// Trading status of the instrument at the time of the quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Trading normally.
    #[default]
    Normal,
    /// Trading halted.
    Halted,
    /// Delisted.
    Delisted,
    /// Circuit breaker triggered.
    Fuse,
    /// Preparing to list.
    PrepareList,
    /// Code moved.
    CodeMoved,
    /// Waiting for the market to open.
    ToBeOpened,
    /// Halted for a stock split.
    SplitStockHalts,
    /// Expired.
    Expired,
    /// Warrant preparing to list.
    WarrantPrepareList,
    /// Trading suspended.
    SuspendTrade,
}

impl TradeStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Halted => "halted",
            Self::Delisted => "delisted",
            Self::Fuse => "fuse",
            Self::PrepareList => "prepare_list",
            Self::CodeMoved => "code_moved",
            Self::ToBeOpened => "to_be_opened",
            Self::SplitStockHalts => "split_stock_halts",
            Self::Expired => "expired",
            Self::WarrantPrepareList => "warrant_prepare_list",
            Self::SuspendTrade => "suspend_trade",
        }
    }
}

/// Aggressor direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// Neutral or unknown.
    #[default]
    Neutral,
    /// Traded at the bid (sell initiated).
    Down,
    /// Traded at the ask (buy initiated).
    Up,
}

impl TradeDirection {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Down => "down",
            Self::Up => "up",
        }
    }
}

/// Quote fields carried by a quote event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSnapshot {
    /// Last traded price.
    pub last_done: Decimal,
    /// Session open.
    pub open: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Cumulative volume.
    pub volume: i64,
    /// Cumulative turnover.
    pub turnover: Decimal,
    /// Trading status.
    pub trade_status: TradeStatus,
    /// Volume of the trade that produced this quote.
    pub current_volume: i64,
    /// Turnover of the trade that produced this quote.
    pub current_turnover: Decimal,
}

/// A single executed trade within a trade event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTick {
    /// Execution price.
    pub price: Decimal,
    /// Executed volume.
    pub volume: i64,
    /// Vendor trade type code.
    pub trade_type: String,
    /// Aggressor direction.
    pub direction: TradeDirection,
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLevel {
    /// 1-based level position.
    pub position: i32,
    /// Level price.
    pub price: Decimal,
    /// Resting volume.
    pub volume: i64,
    /// Number of resting orders.
    pub order_count: i64,
}

/// Both sides of the order book, best level first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthBook {
    /// Ask levels.
    pub asks: Vec<DepthLevel>,
    /// Bid levels.
    pub bids: Vec<DepthLevel>,
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Quote update.
    Quote(QuoteSnapshot),
    /// Trades, in execution order.
    Trade(Vec<TradeTick>),
    /// Depth snapshot.
    Depth(DepthBook),
}

impl EventPayload {
    /// The kind matching this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Quote(_) => EventKind::Quote,
            Self::Trade(_) => EventKind::Trade,
            Self::Depth(_) => EventKind::Depth,
        }
    }

    fn validate(&self) -> Result<(), MappingError> {
        match self {
            Self::Quote(quote) => {
                if quote.volume < 0 || quote.current_volume < 0 {
                    return Err(MappingError::NegativeVolume);
                }
            }
            Self::Trade(trades) => {
                if trades.is_empty() {
                    return Err(MappingError::EmptyTrades);
                }
                if trades.iter().any(|t| t.volume < 0) {
                    return Err(MappingError::NegativeVolume);
                }
            }
            Self::Depth(book) => {
                if book.asks.is_empty() && book.bids.is_empty() {
                    return Err(MappingError::EmptyDepth);
                }
                for level in book.asks.iter().chain(&book.bids) {
                    if level.position < 1 {
                        return Err(MappingError::InvalidPosition(level.position));
                    }
                    if level.volume < 0 || level.order_count < 0 {
                        return Err(MappingError::NegativeVolume);
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Event Record
// =============================================================================

/// Reasons a pushed event cannot become an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// Symbol was empty or whitespace.
    #[error("event symbol is empty")]
    EmptySymbol,
    /// Trade event without any trades.
    #[error("trade event contains no trades")]
    EmptyTrades,
    /// Depth event without asks or bids.
    #[error("depth event contains neither asks nor bids")]
    EmptyDepth,
    /// Volume or order count below zero.
    #[error("negative volume or order count")]
    NegativeVolume,
    /// Depth position below 1.
    #[error("invalid depth position {0}")]
    InvalidPosition(i32),
}

/// One received push event, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    symbol: String,
    payload: EventPayload,
    received_at: DateTime<Utc>,
}

impl EventRecord {
    /// Build a record, validating symbol and payload shape.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] if the symbol is blank or the payload is
    /// malformed.
    pub fn new(
        symbol: impl Into<String>,
        payload: EventPayload,
        received_at: DateTime<Utc>,
    ) -> Result<Self, MappingError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(MappingError::EmptySymbol);
        }
        payload.validate()?;
        Ok(Self {
            symbol,
            payload,
            received_at,
        })
    }

    /// Build a record stamped with the current time.
    ///
    /// # Errors
    ///
    /// See [`EventRecord::new`].
    pub fn received_now(
        symbol: impl Into<String>,
        payload: EventPayload,
    ) -> Result<Self, MappingError> {
        Self::new(symbol, payload, Utc::now())
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Kind-specific data.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Local receive time.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Flatten the record into the rows written for it.
    #[must_use]
    pub fn to_rows(&self) -> RowBatch {
        RowBatch::from_record(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
