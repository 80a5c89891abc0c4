//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the ingestion pipeline itself and the concrete
//! implementations of the port interfaces defined in the application layer.

/// Configuration loading.
pub mod config;

/// Replay feed client.
pub mod feed;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Bounded queue, ingestion callback, persistence worker, and controller.
pub mod pipeline;

/// SQLite and in-memory storage backends.
pub mod storage;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
