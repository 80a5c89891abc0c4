//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ConnectionFactory` / `StorageConnection`: transactional row inserts
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedClient`: pushes market events into registered callbacks

mod feed;
mod storage;

pub use feed::{FeedClient, FeedError, PushHandler, SubscriptionKind};
pub use storage::{ConnectionFactory, StorageConnection, StorageError};

#[cfg(test)]
pub use storage::MockConnectionFactory;
