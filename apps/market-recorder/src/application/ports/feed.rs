//! Feed port.
//!
//! A feed client delivers pushed events by invoking registered callbacks
//! from its own delivery context. Callbacks must return promptly and must
//! never fail; the client may invoke callbacks for different kinds
//! concurrently.

use std::sync::Arc;

use crate::domain::event::EventKind;
use crate::domain::push::PushEvent;

/// Callback invoked with `(symbol, event)` for every pushed event.
pub type PushHandler = Arc<dyn Fn(&str, PushEvent) + Send + Sync>;

/// Subscription channel on the feed.
pub type SubscriptionKind = EventKind;

/// Feed client failure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Subscription request was rejected.
    #[error("subscription rejected: {0}")]
    Subscribe(String),

    /// Feed source could not be read.
    #[error("feed source error: {0}")]
    Source(#[from] std::io::Error),

    /// Feed was started twice or before subscribing.
    #[error("feed state error: {0}")]
    State(String),
}

/// Market data feed client.
pub trait FeedClient: Send + Sync {
    /// Register the handler for one event kind, replacing any previous one.
    fn register_callback(&self, kind: SubscriptionKind, handler: PushHandler);

    /// Subscribe to `kinds` for `symbols`. With `is_first_push` the feed
    /// also delivers its current snapshot for each subscription.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Subscribe`] if the request is rejected.
    fn subscribe(
        &self,
        symbols: &[String],
        kinds: &[SubscriptionKind],
        is_first_push: bool,
    ) -> Result<(), FeedError>;
}
