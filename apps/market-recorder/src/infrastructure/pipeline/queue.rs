//! Bounded hand-off queue.
//!
//! A thin wrapper over a tokio bounded mpsc channel giving the pipeline
//! its three operations: non-blocking enqueue for producers, dequeue with
//! a timeout for the single consumer, and close.
//!
//! Producers may live on any thread, including plain OS threads owned by a
//! feed SDK; `enqueue` never awaits and never blocks. Slot assignment is
//! atomic inside the channel, so items come out in the order their
//! `enqueue` calls succeeded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError, TrySendError};

use crate::domain::event::EventRecord;

/// Item carried by the pipeline queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// A record to persist.
    Record(EventRecord),
    /// Shutdown sentinel. Everything queued ahead of it is persisted first.
    Shutdown,
}

/// Queue construction failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Capacity must be at least one.
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
}

/// Rejected enqueue. The item is handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError<T> {
    /// Queue is at capacity.
    #[error("queue is full")]
    Full(T),
    /// Queue has been closed.
    #[error("queue is closed")]
    Closed(T),
}

impl<T> EnqueueError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

/// Result of a dequeue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// Next item in FIFO order.
    Item(T),
    /// Nothing arrived before the timeout.
    Empty,
    /// Queue is closed and fully drained.
    Closed,
}

/// Create a bounded queue.
///
/// # Errors
///
/// Returns [`QueueError::ZeroCapacity`] if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> Result<(QueueSender<T>, QueueReceiver<T>), QueueError> {
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueSender { tx }, QueueReceiver { rx }))
}

/// Producer side. Cheap to clone.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] at capacity and
    /// [`EnqueueError::Closed`] after the queue was closed. Nothing is added
    /// in either case.
    pub fn enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => EnqueueError::Full(item),
            TrySendError::Closed(item) => EnqueueError::Closed(item),
        })
    }

    /// Enqueue, waiting at most `timeout` for a free slot.
    ///
    /// Only for control items such as the shutdown sentinel; event
    /// producers use [`enqueue`](Self::enqueue).
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if no slot freed up in time and
    /// [`EnqueueError::Closed`] if the queue is closed.
    pub async fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), EnqueueError<T>> {
        self.tx.send_timeout(item, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(item) => EnqueueError::Full(item),
            SendTimeoutError::Closed(item) => EnqueueError::Closed(item),
        })
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether the consumer closed the queue or went away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. There is exactly one.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Wait up to `timeout` for the next item.
    pub async fn dequeue(&mut self, timeout: Duration) -> Dequeued<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Dequeued::Item(item),
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Empty,
        }
    }

    /// Take the next item if one is buffered.
    pub fn try_dequeue(&mut self) -> Dequeued<T> {
        match self.rx.try_recv() {
            Ok(item) => Dequeued::Item(item),
            Err(TryRecvError::Empty) => Dequeued::Empty,
            Err(TryRecvError::Disconnected) => Dequeued::Closed,
        }
    }

    /// Reject further enqueues. Buffered items can still be dequeued;
    /// afterwards dequeue reports [`Dequeued::Closed`].
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
