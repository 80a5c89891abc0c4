//! Domain Layer - Core event types and pipeline state.
//!
//! This layer contains the market event records and the pipeline lifecycle
//! state machine, with no I/O of its own.

/// Market event records and their storage row shapes.
pub mod event;

/// Pipeline lifecycle state machine.
pub mod lifecycle;

/// Vendor push events and their mapping into event records.
pub mod push;
