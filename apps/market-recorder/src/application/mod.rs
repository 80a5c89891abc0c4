//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the pipeline
//! interacts with the feed and the storage backend.

/// Port interfaces for external systems (feed, storage).
pub mod ports;
