//! Single-Writer Counter
//!
//! A [`Counter`] is an integer statistic that many connection tasks update at
//! once. Callers never touch the value: they submit signed deltas into a
//! bounded queue, and one background task per counter applies them in
//! arrival order.
//!
//! ```text
//!  conn 1 ──increment(1)──┐
//!  conn 2 ──increment(7)──┼──> [ bounded queue ] ──> apply task ──> value
//!  conn 3 ──decrement(1)──┘       (capacity N)       (sole writer)
//! ```
//!
//! Updates from different callers may land in any relative order, but none is
//! lost or applied twice, so the value always equals the sum of every delta
//! submitted. When the queue is full, `increment` waits for space: a busy
//! connection is throttled by its own statistics instead of dropping them.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Default number of pending deltas a counter absorbs before callers wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

enum Update {
    Delta(i64),
    /// Replies with the value once every earlier update has been applied
    Sync(oneshot::Sender<i64>),
}

/// A concurrently updated integer statistic.
///
/// Cloning a `Counter` yields another handle to the same value and the same
/// apply task.
#[derive(Clone)]
pub struct Counter {
    value: Arc<AtomicI64>,
    updates: mpsc::Sender<Update>,
}

impl Counter {
    /// Creates a counter with the default queue capacity.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the apply task is
    /// spawned immediately.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a counter whose queue holds up to `capacity` pending deltas.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_capacity(capacity: usize) -> Self {
        let (updates, rx) = mpsc::channel(capacity.max(1));
        let value = Arc::new(AtomicI64::new(0));

        tokio::spawn(apply_updates(Arc::clone(&value), rx));

        Self { value, updates }
    }

    /// Adds `n` to the counter, waiting if the queue is full.
    pub async fn increment(&self, n: i64) {
        self.submit(Update::Delta(n)).await;
    }

    /// Subtracts `n` from the counter, waiting if the queue is full.
    pub async fn decrement(&self, n: i64) {
        self.submit(Update::Delta(n.wrapping_neg())).await;
    }

    /// Returns the value as of the last applied update.
    ///
    /// Deltas still sitting in the queue are not reflected.
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Returns the value after every update submitted before this call has
    /// been applied.
    pub async fn settled(&self) -> i64 {
        let (tx, rx) = oneshot::channel();
        if self.updates.send(Update::Sync(tx)).await.is_err() {
            return self.value();
        }
        rx.await.unwrap_or_else(|_| self.value())
    }

    /// Number of deltas waiting to be applied.
    pub fn pending(&self) -> usize {
        self.updates.max_capacity() - self.updates.capacity()
    }

    async fn submit(&self, update: Update) {
        if self.updates.send(update).await.is_err() {
            // Only happens once the runtime is shutting down
            trace!("Counter apply task has stopped, update dropped");
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("value", &self.value())
            .field("pending", &self.pending())
            .finish()
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// The apply loop. Exits when every handle has been dropped.
async fn apply_updates(value: Arc<AtomicI64>, mut rx: mpsc::Receiver<Update>) {
    while let Some(update) = rx.recv().await {
        match update {
            Update::Delta(n) => {
                // Sole writer: load + store cannot race another update
                let current = value.load(Ordering::Relaxed);
                value.store(current.wrapping_add(n), Ordering::Release);
            }
            Update::Sync(reply) => {
                let _ = reply.send(value.load(Ordering::Acquire));
            }
        }
    }
}
