//! Memory-pressure signaling
//!
//! The OS-level pressure notification is not modeled here. Embedders own a
//! [`MemoryPressure`] value, wire it to whatever platform signal they have,
//! and hand it to [`Store::open_with_pressure`](crate::Store::open_with_pressure).
//! Each store registers a scoped subscription when it opens and drops it
//! when it closes; there is no implicit global registration.

use tokio::sync::broadcast;

/// Process-local memory-pressure fan-out
///
/// Cloning shares the same underlying signal; every store subscribed to any
/// clone reacts to every [`signal`](MemoryPressure::signal).
#[derive(Debug, Clone)]
pub struct MemoryPressure {
    tx: broadcast::Sender<()>,
}

impl MemoryPressure {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    /// Signal pressure to every subscribed store
    ///
    /// Each store flushes its current snapshot and then clears its in-memory
    /// cache. Having no subscribers is not an error.
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_without_subscribers() {
        let pressure = MemoryPressure::new();
        pressure.signal();
    }

    #[tokio::test]
    async fn test_clones_share_the_signal() {
        let pressure = MemoryPressure::new();
        let clone = pressure.clone();
        let mut rx = pressure.subscribe();

        clone.signal();
        assert!(rx.recv().await.is_ok());
    }
}
