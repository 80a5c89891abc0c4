//! Storage row shapes produced from event records.
//!
//! One record maps to exactly one table. Quote records yield a single row,
//! trade records one row per trade, depth records one row per ask level
//! followed by one row per bid level.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{EventPayload, EventRecord, TradeDirection, TradeStatus};

/// Destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `quotes`
    Quotes,
    /// `trades`
    Trades,
    /// `depths`
    Depths,
}

impl Table {
    /// Table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::Trades => "trades",
            Self::Depths => "depths",
        }
    }

    /// Table receiving records of `kind`.
    #[must_use]
    pub const fn for_kind(kind: super::EventKind) -> Self {
        match kind {
            super::EventKind::Quote => Self::Quotes,
            super::EventKind::Trade => Self::Trades,
            super::EventKind::Depth => Self::Depths,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-book side tag for depth rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    /// Ask (sell) side.
    Ask,
    /// Bid (buy) side.
    Bid,
}

impl BookSide {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Bid => "bid",
        }
    }
}

/// Row of the `quotes` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRow {
    /// Instrument symbol.
    pub symbol: String,
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
    /// Current-trade volume.
    pub current_volume: i64,
    /// Current-trade turnover.
    pub current_turnover: Decimal,
    /// Receive time.
    pub ts: DateTime<Utc>,
}

/// Row of the `trades` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRow {
    /// Instrument symbol.
    pub symbol: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed volume.
    pub volume: i64,
    /// Vendor trade type code.
    pub trade_type: String,
    /// Aggressor direction.
    pub direction: TradeDirection,
    /// Receive time.
    pub ts: DateTime<Utc>,
}

/// Row of the `depths` table. The timestamp column is filled by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthRow {
    /// Instrument symbol.
    pub symbol: String,
    /// 1-based level position.
    pub position: i32,
    /// Level price.
    pub price: Decimal,
    /// Resting volume.
    pub volume: i64,
    /// Number of resting orders.
    pub order_count: i64,
    /// Book side.
    pub side: BookSide,
}

/// Rows for a single table, written in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowBatch {
    /// Quote rows.
    Quotes(Vec<QuoteRow>),
    /// Trade rows.
    Trades(Vec<TradeRow>),
    /// Depth rows.
    Depths(Vec<DepthRow>),
}

impl RowBatch {
    pub(super) fn from_record(record: &EventRecord) -> Self {
        let symbol = record.symbol();
        let ts = record.received_at();
        match record.payload() {
            EventPayload::Quote(q) => Self::Quotes(vec![QuoteRow {
                symbol: symbol.to_string(),
                last_done: q.last_done,
                open: q.open,
                high: q.high,
                low: q.low,
                volume: q.volume,
                turnover: q.turnover,
                trade_status: q.trade_status,
                current_volume: q.current_volume,
                current_turnover: q.current_turnover,
                ts,
            }]),
            EventPayload::Trade(trades) => Self::Trades(
                trades
                    .iter()
                    .map(|t| TradeRow {
                        symbol: symbol.to_string(),
                        price: t.price,
                        volume: t.volume,
                        trade_type: t.trade_type.clone(),
                        direction: t.direction,
                        ts,
                    })
                    .collect(),
            ),
            EventPayload::Depth(book) => {
                let side_rows = |levels: &[super::DepthLevel], side: BookSide| {
                    levels
                        .iter()
                        .map(|l| DepthRow {
                            symbol: symbol.to_string(),
                            position: l.position,
                            price: l.price,
                            volume: l.volume,
                            order_count: l.order_count,
                            side,
                        })
                        .collect::<Vec<_>>()
                };
                let mut rows = side_rows(book.asks.as_slice(), BookSide::Ask);
                rows.extend(side_rows(book.bids.as_slice(), BookSide::Bid));
                Self::Depths(rows)
            }
        }
    }

    /// Destination table.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Quotes(_) => Table::Quotes,
            Self::Trades(_) => Table::Trades,
            Self::Depths(_) => Table::Depths,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Quotes(rows) => rows.len(),
            Self::Trades(rows) => rows.len(),
            Self::Depths(rows) => rows.len(),
        }
    }

    /// Whether there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
