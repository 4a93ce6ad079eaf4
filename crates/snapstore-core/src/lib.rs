//! snapstore core library
//!
//! A process-local persistent store for a homogeneous collection of
//! records. The collection is the unit of everything: writes replace it
//! whole, reads return it whole, change events carry it whole. There is no
//! querying, no partial update, and no multi-process coordination: just a
//! snapshot, a lagging disk mirror, and a change stream.
//!
//! # Architecture
//!
//! - **Store**: owns the in-memory snapshot, the single piece of shared
//!   mutable state
//! - **Debounced writer**: coalesces bursts of writes into one background
//!   flush after a quiet period
//! - **Change notifier**: replay-then-live stream of committed snapshots
//! - **File persistence**: one file per document identity, written
//!   atomically through a pluggable codec
//!
//! # Quick Start
//!
//! ```text
//! let config = StoreConfig::new("sessions.json");
//! let store: Store<Session> = Store::open(config)?;
//!
//! let mut changes = store.subscribe();
//! store.write(vec![session])?;
//!
//! let current = store.read()?;
//! ```
//!
//! # Modules
//!
//! - `store`: the storage core (main entry point)
//! - `config`: construction-time configuration and path resolution
//! - `codec`: record serialization (JSON default, CBOR alternative)
//! - `notify`: change streams for subscribers
//! - `pressure`: injectable memory-pressure signal source
//! - `storage`: backing-file persistence and the error taxonomy

pub mod codec;
pub mod config;
pub mod notify;
pub mod pressure;
pub mod storage;
pub mod store;
mod writer;

pub use codec::{CborCodec, Codec, JsonCodec};
pub use config::{StorageArea, StoreConfig};
pub use notify::ChangeStream;
pub use pressure::MemoryPressure;
pub use storage::{StoreError, StoreResult};
pub use store::Store;
