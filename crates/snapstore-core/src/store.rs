//! The storage core
//!
//! [`Store`] owns the in-memory snapshot and coordinates between:
//! - the debounced writer (coalesced background persistence)
//! - the change notifier (replay-then-live subscriber streams)
//! - the backing file (atomic byte-level persistence through a codec)
//!
//! ## Modes
//!
//! With the cache on (the default), reads return the in-memory snapshot and
//! never touch disk; writes swap the snapshot, notify subscribers, and
//! signal the debounced writer, all before returning. Disk persistence lags
//! behind by up to the debounce interval, and its outcome is not reported
//! back to callers.
//!
//! With the cache off, every read loads the backing file on the calling
//! thread and every write is queued to a background worker that encodes,
//! persists, and only then notifies subscribers.
//!
//! ## Usage
//!
//! ```ignore
//! let store: Store<Session> = Store::open(StoreConfig::new("sessions.json"))?;
//!
//! let mut changes = store.subscribe();
//! store.write(vec![session])?;
//!
//! let current = store.read()?;
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::StoreConfig;
use crate::notify::{ChangeNotifier, ChangeStream};
use crate::pressure::MemoryPressure;
use crate::storage::{FilePersistence, StoreError, StoreResult};
use crate::writer::{DebouncedWriter, WriterHandle};

/// Queued file-only writes before best-effort dropping begins
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Process-local persistent store for a collection of records
///
/// The collection is the unit of every operation: writes replace it whole,
/// reads return it whole, change events carry it whole. Opening requires a
/// running tokio runtime; the background tasks are spawned on it.
pub struct Store<T, C = JsonCodec> {
    inner: Arc<Inner<T, C>>,
    /// Debounced flusher; present in cached mode
    writer: Option<DebouncedWriter>,
    /// Write queue feeding the worker; present in file-only mode
    write_tx: Option<mpsc::Sender<Vec<T>>>,
    write_task: Option<JoinHandle<()>>,
    /// Scoped memory-pressure subscription, aborted at close/drop
    pressure_task: Option<JoinHandle<()>>,
}

struct Inner<T, C> {
    config: StoreConfig,
    file: FilePersistence,
    codec: C,
    /// Current snapshot (cached mode). Swapped whole under the write lock;
    /// committed events are emitted under the same lock, which is what makes
    /// replay and delivery order line up with commit order.
    snapshot: RwLock<Vec<T>>,
    /// Commit counter; zero means no write has landed yet
    generation: AtomicU64,
    /// Serializes every disk write, and file-only replay reads
    io: Mutex<()>,
    notifier: ChangeNotifier<T>,
}

impl<T> Store<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open a store with the default JSON codec
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_codec(config, JsonCodec, None)
    }

    /// Open a store that reacts to a memory-pressure source
    ///
    /// The subscription is scoped to the store: registered here, dropped at
    /// [`close`](Store::close) (or when the store is dropped).
    pub fn open_with_pressure(
        config: StoreConfig,
        pressure: &MemoryPressure,
    ) -> StoreResult<Self> {
        Self::open_with_codec(config, JsonCodec, Some(pressure))
    }
}

impl<T, C> Store<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    /// Open a store with a custom codec
    ///
    /// Resolves the backing file path exactly once; an unresolvable platform
    /// directory fails here with [`StoreError::PathResolution`], never from a
    /// later operation.
    pub fn open_with_codec(
        config: StoreConfig,
        codec: C,
        pressure: Option<&MemoryPressure>,
    ) -> StoreResult<Self> {
        let path = config.resolve_path()?;
        let inner = Arc::new(Inner {
            file: FilePersistence::new(path),
            codec,
            snapshot: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            io: Mutex::new(()),
            notifier: ChangeNotifier::new(),
            config,
        });
        debug!(
            name = %inner.config.name,
            path = %inner.file.path().display(),
            cached = inner.config.cached,
            "opening store"
        );

        let mut writer = None;
        let mut write_tx = None;
        let mut write_task = None;

        if inner.config.cached {
            let flush_inner = Arc::clone(&inner);
            writer = Some(DebouncedWriter::spawn(inner.config.debounce(), move || {
                flush_inner.flush_snapshot()
            }));

            // Best-effort population of the snapshot. Races early reads by
            // design; never clobbers a snapshot a write already replaced.
            let load_inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let items = load_inner.load_tolerant();
                load_inner.install_initial(items);
            });
        } else {
            let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
            write_task = Some(tokio::spawn(write_through_loop(Arc::clone(&inner), rx)));
            write_tx = Some(tx);
        }

        let pressure_task = pressure.map(|source| {
            let mut rx = source.subscribe();
            let task_inner = Arc::clone(&inner);
            let writer_handle = writer.as_ref().map(|w| w.handle().clone());
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        // A missed signal still means pressure happened.
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            task_inner.handle_pressure(writer_handle.as_ref());
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        });

        Ok(Self {
            inner,
            writer,
            write_tx,
            write_task,
            pressure_task,
        })
    }

    /// Current collection
    ///
    /// Cached mode: returns the in-memory snapshot and never touches disk.
    /// The snapshot may be empty before the background load lands and after
    /// a memory-pressure clear; both races are intentional and this call
    /// cannot fail.
    ///
    /// File-only mode: loads the backing file on the calling thread. A
    /// missing file is an empty collection; malformed bytes are a
    /// [`StoreError::Decode`].
    pub fn read(&self) -> StoreResult<Vec<T>> {
        if self.inner.config.cached {
            Ok(read_lock(&self.inner.snapshot).clone())
        } else {
            self.inner.load_from_disk()
        }
    }

    /// Replace the collection
    ///
    /// Cached mode: the snapshot swap, the change broadcast, and the dirty
    /// signal to the debounced writer all happen before this returns; the
    /// disk write itself is deferred, and its eventual failure is logged,
    /// not reported.
    ///
    /// File-only mode: the write is queued to a background worker that
    /// encodes, persists, and only then notifies subscribers. A failed or
    /// dropped write is logged, never retried, never surfaced.
    pub fn write(&self, items: Vec<T>) -> StoreResult<()> {
        if self.inner.config.cached {
            {
                let mut snapshot = write_lock(&self.inner.snapshot);
                *snapshot = items.clone();
                self.inner.generation.fetch_add(1, Ordering::Release);
                self.inner.notifier.emit(items);
            }
            let writer = self.writer.as_ref().ok_or(StoreError::Closed)?;
            if writer.handle().mark_dirty() {
                Ok(())
            } else {
                Err(StoreError::Closed)
            }
        } else {
            let tx = self.write_tx.as_ref().ok_or(StoreError::Closed)?;
            match tx.try_send(items) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "write queue for '{}' is full; dropping write",
                        self.inner.config.name
                    );
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(StoreError::Closed),
            }
        }
    }

    /// Replay-then-live change stream
    ///
    /// The stream first yields the collection as of subscribe time: the
    /// in-memory snapshot in cached mode, or a best-effort file load in
    /// file-only mode (a malformed or missing file replays an empty
    /// collection). After that it yields every committed write in commit
    /// order, with no gaps and no duplicates. Dropping the stream
    /// unsubscribes.
    pub fn subscribe(&self) -> ChangeStream<T> {
        if self.inner.config.cached {
            // Captured under the commit lock, so no event lands between the
            // replay value and the join point.
            let snapshot = read_lock(&self.inner.snapshot);
            self.inner.notifier.subscribe_with(snapshot.clone())
        } else {
            let _io = io_lock(&self.inner.io);
            let replay = match self.inner.load_from_disk() {
                Ok(items) => items,
                Err(e) => {
                    warn!("replay load failed: {e}; replaying an empty collection");
                    Vec::new()
                }
            };
            self.inner.notifier.subscribe_with(replay)
        }
    }

    /// Persist the current snapshot immediately, bypassing the debounce
    /// window
    ///
    /// No-op in file-only mode, where writes are already written through.
    pub fn flush(&self) -> StoreResult<()> {
        if self.inner.config.cached {
            self.inner.flush_snapshot()
        } else {
            Ok(())
        }
    }

    /// React to memory pressure: flush the current snapshot, then clear it
    ///
    /// Until the next write, cached reads return an empty collection; the
    /// store trades staleness after pressure for reclaimed memory and
    /// performs no automatic reload. No-op in file-only mode.
    pub fn on_memory_pressure(&self) {
        self.inner
            .handle_pressure(self.writer.as_ref().map(|w| w.handle()));
    }

    /// Flush any pending write and stop the background tasks
    ///
    /// Dropping the store without calling this is safe (the writer still
    /// drains on its own), but `close` is the only way to wait for it.
    pub async fn close(mut self) {
        if let Some(task) = self.pressure_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.write_tx.take();
        if let Some(task) = self.write_task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("write worker panicked: {e}");
                }
            }
        }
        if let Some(writer) = self.writer.take() {
            writer.shutdown().await;
        }
    }

    /// The configuration this store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The resolved backing file path
    pub fn path(&self) -> &Path {
        self.inner.file.path()
    }
}

impl<T, C> Drop for Store<T, C> {
    fn drop(&mut self) {
        if let Some(task) = self.pressure_task.take() {
            task.abort();
        }
        // Dropping the writer and the write queue closes their channels;
        // the tasks flush anything pending and exit on their own.
    }
}

async fn write_through_loop<T, C>(inner: Arc<Inner<T, C>>, mut rx: mpsc::Receiver<Vec<T>>)
where
    T: Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    while let Some(items) = rx.recv().await {
        inner.write_through(items);
    }
}

impl<T, C> Inner<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Codec<T>,
{
    fn load_from_disk(&self) -> StoreResult<Vec<T>> {
        match self.file.load()? {
            Some(bytes) => self.codec.decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn load_tolerant(&self) -> Vec<T> {
        match self.load_from_disk() {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    "failed to load '{}': {e}; starting empty",
                    self.file.path().display()
                );
                Vec::new()
            }
        }
    }

    /// Install the initially loaded collection, unless a write got there
    /// first; disk state must never replace a newer snapshot.
    fn install_initial(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut snapshot = write_lock(&self.snapshot);
        if self.generation.load(Ordering::Acquire) != 0 {
            return;
        }
        debug!(records = items.len(), "initial snapshot loaded");
        *snapshot = items.clone();
        self.notifier.emit(items);
    }

    /// Persist the snapshot as it is right now
    ///
    /// Runs on whichever thread asked for it; the io mutex keeps it
    /// serialized against every other disk write for this store.
    fn flush_snapshot(&self) -> StoreResult<()> {
        let _io = io_lock(&self.io);
        let items = read_lock(&self.snapshot).clone();
        let bytes = self.codec.encode(&items)?;
        self.file.save(&bytes)
    }

    fn write_through(&self, items: Vec<T>) {
        let _io = io_lock(&self.io);
        let bytes = match self.codec.encode(&items) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode records: {e}");
                return;
            }
        };
        if let Err(e) = self.file.save(&bytes) {
            error!("failed to persist '{}': {e}", self.file.path().display());
            return;
        }
        // Committed: subscribers hear about a write only once its bytes
        // have landed.
        self.notifier.emit(items);
    }

    fn handle_pressure(&self, writer: Option<&WriterHandle>) {
        if !self.config.cached {
            return;
        }
        if let Err(e) = self.flush_snapshot() {
            error!("memory-pressure flush failed: {e}");
        }
        // The flush covered every dirty signal queued so far; a timer left
        // armed would later persist the cleared snapshot over it.
        if let Some(writer) = writer {
            writer.disarm();
        }
        write_lock(&self.snapshot).clear();
        debug!("snapshot cleared under memory pressure");
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn io_lock(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        key: String,
    }

    fn entry(key: &str) -> Entry {
        Entry { key: key.into() }
    }

    fn test_config(temp_dir: &TempDir) -> StoreConfig {
        let mut config = StoreConfig::new("entries.json");
        config.data_dir = Some(temp_dir.path().to_path_buf());
        config.debounce_ms = 25;
        config
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_resolves_path_once() {
        let temp_dir = TempDir::new().unwrap();
        let store: Store<Entry> = Store::open(test_config(&temp_dir)).unwrap();

        assert_eq!(store.path(), temp_dir.path().join("entries.json"));
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cached_read_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store: Store<Entry> = Store::open(test_config(&temp_dir)).unwrap();

        assert!(store.read().unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cached_write_is_visible_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let store: Store<Entry> = Store::open(test_config(&temp_dir)).unwrap();

        store.write(vec![entry("a")]).unwrap();
        assert_eq!(store.read().unwrap(), vec![entry("a")]);

        store.write(vec![entry("b"), entry("c")]).unwrap();
        assert_eq!(store.read().unwrap(), vec![entry("b"), entry("c")]);

        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_flushes_pending_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        // Long enough that only the close-path flush can persist it.
        config.debounce_ms = 60_000;

        let store: Store<Entry> = Store::open(config).unwrap();
        store.write(vec![entry("pending")]).unwrap();
        let path = store.path().to_path_buf();
        store.close().await;

        let bytes = std::fs::read(path).unwrap();
        let persisted: Vec<Entry> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted, vec![entry("pending")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_explicit_flush_bypasses_debounce() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.debounce_ms = 60_000;

        let store: Store<Entry> = Store::open(config).unwrap();
        store.write(vec![entry("now")]).unwrap();
        store.flush().unwrap();

        let bytes = std::fs::read(store.path()).unwrap();
        let persisted: Vec<Entry> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted, vec![entry("now")]);

        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_only_read_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.cached = false;

        let store: Store<Entry> = Store::open(config).unwrap();
        assert!(store.read().unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_only_read_propagates_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.cached = false;

        std::fs::write(temp_dir.path().join("entries.json"), b"{corrupt").unwrap();

        let store: Store<Entry> = Store::open(config).unwrap();
        let err = store.read().unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cached_load_failure_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("entries.json"), b"{corrupt").unwrap();

        let store: Store<Entry> = Store::open(test_config(&temp_dir)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.read().unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_background_load_populates_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let existing = vec![entry("persisted")];
        std::fs::write(
            temp_dir.path().join("entries.json"),
            serde_json::to_vec(&existing).unwrap(),
        )
        .unwrap();

        let store: Store<Entry> = Store::open(test_config(&temp_dir)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.read().unwrap(), existing);
        store.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_memory_pressure_noop_in_file_only_mode() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.cached = false;

        let store: Store<Entry> = Store::open(config).unwrap();
        store.on_memory_pressure();
        assert!(store.read().unwrap().is_empty());
        store.close().await;
    }
}
