//! Vendor Push Event Types
//!
//! Wire format types for the three push events the quote feed delivers,
//! plus their mapping into [`EventRecord`]s.
//!
//! Prices arrive as decimal strings and are kept exact.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"type": "quote", "last_done": "150.00", "open": "148.50", "high": "151.20",
//!  "low": "147.90", "volume": 1000, "turnover": "150000.00",
//!  "trade_status": "normal", "current_volume": 10, "current_turnover": "1500.00"}
//! {"type": "trades", "trades": [{"price": "150.00", "volume": 10,
//!  "trade_type": "", "direction": "up"}]}
//! {"type": "depth", "asks": [{"position": 1, "price": "150.10", "volume": 300,
//!  "order_num": 4}], "bids": []}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::event::{
    DepthBook, DepthLevel, EventKind, EventPayload, EventRecord, MappingError, QuoteSnapshot,
    TradeDirection, TradeStatus, TradeTick,
};

// =============================================================================
// Quote
// =============================================================================

/// Quote push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushQuote {
    /// Last traded price
    pub last_done: Decimal,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Feed timestamp. Informational only; records use the receive time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Cumulative volume
    pub volume: i64,
    /// Cumulative turnover
    pub turnover: Decimal,
    /// Trading status
    #[serde(default)]
    pub trade_status: TradeStatus,
    /// Volume of the latest trade
    #[serde(default)]
    pub current_volume: i64,
    /// Turnover of the latest trade
    #[serde(default)]
    pub current_turnover: Decimal,
}

// =============================================================================
// Trades
// =============================================================================

/// One trade inside a [`PushTrades`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTrade {
    /// Price
    pub price: Decimal,
    /// Volume
    pub volume: i64,
    /// Feed timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Vendor trade type code, often empty
    #[serde(default)]
    pub trade_type: String,
    /// Aggressor direction
    #[serde(default)]
    pub direction: TradeDirection,
}

/// Trades push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTrades {
    /// Trades in execution order
    pub trades: Vec<PushTrade>,
}

// =============================================================================
// Depth
// =============================================================================

/// One order-book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDepthLevel {
    /// 1-based position
    pub position: i32,
    /// Price
    pub price: Decimal,
    /// Volume
    pub volume: i64,
    /// Number of orders
    pub order_num: i64,
}

/// Depth push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDepth {
    /// Ask levels, best first
    #[serde(default)]
    pub asks: Vec<PushDepthLevel>,
    /// Bid levels, best first
    #[serde(default)]
    pub bids: Vec<PushDepthLevel>,
}

// =============================================================================
// Envelope
// =============================================================================

/// Any push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEvent {
    /// Quote update
    Quote(PushQuote),
    /// Trades
    Trades(PushTrades),
    /// Depth snapshot
    Depth(PushDepth),
}

impl PushEvent {
    /// Event kind this push maps to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Quote(_) => EventKind::Quote,
            Self::Trades(_) => EventKind::Trade,
            Self::Depth(_) => EventKind::Depth,
        }
    }

    /// Map into a validated record stamped with `received_at`.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] if the symbol is blank or the event is
    /// structurally invalid.
    pub fn into_record(
        self,
        symbol: &str,
        received_at: DateTime<Utc>,
    ) -> Result<EventRecord, MappingError> {
        let payload = match self {
            Self::Quote(q) => EventPayload::Quote(QuoteSnapshot {
                last_done: q.last_done,
                open: q.open,
                high: q.high,
                low: q.low,
                volume: q.volume,
                turnover: q.turnover,
                trade_status: q.trade_status,
                current_volume: q.current_volume,
                current_turnover: q.current_turnover,
            }),
            Self::Trades(t) => EventPayload::Trade(
                t.trades
                    .into_iter()
                    .map(|t| TradeTick {
                        price: t.price,
                        volume: t.volume,
                        trade_type: t.trade_type,
                        direction: t.direction,
                    })
                    .collect(),
            ),
            Self::Depth(d) => EventPayload::Depth(DepthBook {
                asks: d.asks.into_iter().map(DepthLevel::from).collect(),
                bids: d.bids.into_iter().map(DepthLevel::from).collect(),
            }),
        };
        EventRecord::new(symbol, payload, received_at)
    }
}

impl From<PushDepthLevel> for DepthLevel {
    fn from(level: PushDepthLevel) -> Self {
        Self {
            position: level.position,
            price: level.price,
            volume: level.volume,
            order_count: level.order_num,
        }
    }
}
