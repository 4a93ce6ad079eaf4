//! Change notification
//!
//! A multicast, replay-then-live stream per store instance. A new
//! subscriber first receives the collection as it was at subscribe time,
//! then every committed write in commit order, with no gaps and no
//! duplicates. The fan-out buffer is bounded: a subscriber that falls more
//! than the buffer size behind loses the oldest events (drop-oldest) and
//! resumes from the oldest retained one. That policy is deliberate: the
//! stream carries full snapshots, so the newest event always supersedes
//! anything dropped.

use tokio::sync::broadcast;
use tracing::warn;

/// Events retained per subscriber before drop-oldest kicks in
const CHANNEL_CAPACITY: usize = 64;

/// Fan-out of committed snapshots to subscribers
pub(crate) struct ChangeNotifier<T> {
    tx: broadcast::Sender<Vec<T>>,
}

impl<T: Clone + Send + 'static> ChangeNotifier<T> {
    pub(crate) fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit a committed snapshot to all current subscribers
    ///
    /// Callers hold the store's commit lock while emitting; that is what
    /// makes event order match commit order. Having no subscribers is not
    /// an error.
    pub(crate) fn emit(&self, snapshot: Vec<T>) {
        let _ = self.tx.send(snapshot);
    }

    /// Join the live stream, with `replay` delivered first
    ///
    /// Must be called under the same commit lock that `emit` callers hold,
    /// so the replay value and the join point line up exactly.
    pub(crate) fn subscribe_with(&self, replay: Vec<T>) -> ChangeStream<T> {
        ChangeStream {
            replay: Some(replay),
            rx: self.tx.subscribe(),
        }
    }
}

/// Stream of committed snapshots for one subscriber
///
/// Yields the replay value first, then every later committed write in
/// commit order. Dropping the stream unsubscribes; it never cancels
/// in-flight persistence.
pub struct ChangeStream<T> {
    replay: Option<Vec<T>>,
    rx: broadcast::Receiver<Vec<T>>,
}

impl<T: Clone> ChangeStream<T> {
    /// The next snapshot, or `None` once the store is gone
    ///
    /// A subscriber that consumes too slowly loses the oldest buffered
    /// events and resumes from the oldest retained one; the lag is logged.
    pub async fn recv(&mut self) -> Option<Vec<T>> {
        if let Some(replay) = self.replay.take() {
            return Some(replay);
        }
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change subscriber lagging; dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
