//! Debounced background flusher
//!
//! A single-slot coalescing scheduler, not a queue. Every dirty signal
//! re-arms one timer; only the most recently armed timer ever fires, and a
//! firing timer runs exactly one flush of whatever the owner's snapshot is
//! at that moment. Signals that land while a flush is writing are latched
//! and trigger one follow-up flush as soon as the current one completes, so
//! no request is ever dropped even though in-between states may never reach
//! disk. A zero debounce degrades to flush-per-signal, still asynchronous
//! and still serialized.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::storage::StoreResult;

/// Cloneable channel ends for signaling the writer task
#[derive(Clone)]
pub(crate) struct WriterHandle {
    dirty_tx: mpsc::Sender<()>,
    disarm_tx: mpsc::Sender<()>,
}

impl WriterHandle {
    /// Record that the snapshot changed, re-arming the flush timer
    ///
    /// Returns `false` if the writer task is gone. A full channel means a
    /// signal is already pending, which is the same thing as sending one.
    pub(crate) fn mark_dirty(&self) -> bool {
        match self.dirty_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Cancel any pending timer and discard queued dirty signals
    ///
    /// Used after an out-of-band flush has already persisted everything the
    /// queued signals were about.
    pub(crate) fn disarm(&self) {
        // Full means a disarm is already queued; idempotent either way.
        let _ = self.disarm_tx.try_send(());
    }
}

/// Owner of the writer task
///
/// Dropping this (without [`shutdown`](DebouncedWriter::shutdown)) closes
/// the signal channel; the task performs a final flush if one was pending
/// and exits on its own.
pub(crate) struct DebouncedWriter {
    handle: WriterHandle,
    task: JoinHandle<()>,
}

impl DebouncedWriter {
    /// Spawn the writer task
    ///
    /// `flush` persists the owner's current snapshot; it only ever runs on
    /// the writer task, one flush at a time.
    pub(crate) fn spawn<F>(debounce: Duration, flush: F) -> Self
    where
        F: Fn() -> StoreResult<()> + Send + Sync + 'static,
    {
        // Dirty signals coalesce: one slot is enough to latch "something
        // changed". Disarms are idempotent, so a small buffer suffices.
        let (dirty_tx, dirty_rx) = mpsc::channel(1);
        let (disarm_tx, disarm_rx) = mpsc::channel(4);
        let task = tokio::spawn(writer_loop(dirty_rx, disarm_rx, debounce, flush));
        Self {
            handle: WriterHandle {
                dirty_tx,
                disarm_tx,
            },
            task,
        }
    }

    pub(crate) fn handle(&self) -> &WriterHandle {
        &self.handle
    }

    /// Close the signal channel and wait for the task to drain
    pub(crate) async fn shutdown(self) {
        let DebouncedWriter { handle, task } = self;
        drop(handle);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!("writer task panicked: {e}");
            }
        }
    }
}

async fn writer_loop<F>(
    mut dirty_rx: mpsc::Receiver<()>,
    mut disarm_rx: mpsc::Receiver<()>,
    debounce: Duration,
    flush: F,
) where
    F: Fn() -> StoreResult<()> + Send + Sync + 'static,
{
    let mut deadline: Option<Instant> = None;
    let mut disarm_open = true;

    loop {
        tokio::select! {
            signal = dirty_rx.recv() => match signal {
                Some(()) => {
                    // Re-arm: only the most recently armed timer ever fires.
                    deadline = Some(Instant::now() + debounce);
                }
                None => {
                    // Store is going away; flush anything still pending.
                    if deadline.take().is_some() {
                        run_flush(&flush);
                    }
                    break;
                }
            },
            cmd = disarm_rx.recv(), if disarm_open => match cmd {
                Some(()) => {
                    deadline = None;
                    while dirty_rx.try_recv().is_ok() {}
                }
                None => disarm_open = false,
            },
            _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                deadline = None;
                run_flush(&flush);
                // Latch: signals that arrived while the flush was writing
                // trigger exactly one follow-up flush, right away.
                loop {
                    match dirty_rx.try_recv() {
                        Ok(()) => {
                            while dirty_rx.try_recv().is_ok() {}
                            run_flush(&flush);
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return,
                    }
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn run_flush<F>(flush: &F)
where
    F: Fn() -> StoreResult<()>,
{
    debug!("flushing snapshot");
    if let Err(e) = flush() {
        // Non-fatal: the in-memory snapshot stays authoritative and a later
        // successful write overwrites whatever is on disk.
        error!("background flush failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_flush(counter: Arc<AtomicUsize>) -> impl Fn() -> StoreResult<()> + Send + Sync {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_burst_coalesces_into_one_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let writer =
            DebouncedWriter::spawn(Duration::from_millis(50), counting_flush(counter.clone()));

        for _ in 0..5 {
            assert!(writer.handle().mark_dirty());
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        writer.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signal_resets_pending_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let writer =
            DebouncedWriter::spawn(Duration::from_millis(200), counting_flush(counter.clone()));

        writer.handle().mark_dirty();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Still inside the window; this re-arms the timer.
        writer.handle().mark_dirty();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        writer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_debounce_flushes_per_signal() {
        let counter = Arc::new(AtomicUsize::new(0));
        let writer = DebouncedWriter::spawn(Duration::ZERO, counting_flush(counter.clone()));

        for _ in 0..3 {
            writer.handle().mark_dirty();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        writer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_flushes_pending_write() {
        let counter = Arc::new(AtomicUsize::new(0));
        let writer =
            DebouncedWriter::spawn(Duration::from_secs(60), counting_flush(counter.clone()));

        writer.handle().mark_dirty();
        writer.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disarm_cancels_pending_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let writer =
            DebouncedWriter::spawn(Duration::from_millis(100), counting_flush(counter.clone()));

        writer.handle().mark_dirty();
        writer.handle().disarm();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Disarm only cancels what was pending; later signals flush normally.
        writer.handle().mark_dirty();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        writer.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signal_during_flush_triggers_follow_up() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slow_flush = {
            let counter = counter.clone();
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                Ok(())
            }
        };
        let writer = DebouncedWriter::spawn(Duration::ZERO, slow_flush);

        writer.handle().mark_dirty();
        // Land a signal while the first flush is still writing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.handle().mark_dirty();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        writer.shutdown().await;
    }
}
