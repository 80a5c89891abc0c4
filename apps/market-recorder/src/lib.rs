#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::type_complexity
    )
)]

//! Market Recorder - Ingestion-Decoupled Event Persistence
//!
//! Receives quote, trade, and order-book depth events pushed by a market
//! data feed and writes them to a relational store without letting storage
//! latency stall the feed's delivery threads.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event records and pipeline lifecycle
//!   - `event`: Canonical event record, payloads, and row shapes
//!   - `lifecycle`: Pipeline state machine
//!   - `push`: Vendor push events and their mapping into records
//!
//! - **Application**: Port definitions
//!   - `ports`: Feed client and storage connection interfaces
//!
//! - **Infrastructure**: The pipeline and its adapters
//!   - `pipeline`: Bounded queue, ingestion callback, persistence worker, controller
//!   - `storage`: SQLite and in-memory backends
//!   - `feed`: Replay feed client
//!   - `config`, `telemetry`, `metrics`: Ambient concerns
//!
//! # Data Flow
//!
//! ```text
//! feed thread(s) ──▶ IngestHandle ──try_send──▶ bounded queue
//!                                                   │
//!                                                   ▼
//!                                        PersistenceWorker ──spawn_blocking──▶ storage
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event records and lifecycle, no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Pipeline and adapters.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{
    EventKind, EventPayload, EventRecord, MappingError, QuoteSnapshot, TradeDirection,
    TradeStatus, TradeTick,
};
pub use domain::lifecycle::PipelineState;

// Pipeline
pub use infrastructure::pipeline::{
    IngestHandle, PipelineController, PipelineError, PipelineSettings, StatsSnapshot,
    SubmitError, WorkerReport,
};

// Storage backends
pub use infrastructure::storage::{InMemoryStorage, SqliteConnectionFactory};

// Feed
pub use domain::push::{PushDepth, PushEvent, PushQuote, PushTrades};
pub use infrastructure::feed::ReplayFeed;

// Config
pub use infrastructure::config::{ConfigError, RecorderConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
