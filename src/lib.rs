//! # PlexLog
//!
//! `plexlog` provides multiple independent append-only log streams on top of
//! a single shared log device. Each stream is a [`LogStore`] with its own
//! sequence-number space; the device amortizes placement, batching, and
//! fsync across all of them.
//!
//! ## Key Features
//!
//! * **Assign-or-append writes**: explicit sequence numbers or atomic
//!   allocation, asynchronous with callbacks or blocking.
//! * **Out-of-order completion tracking**: contiguous issued/completed
//!   cursors advance only over dense prefixes.
//! * **Two-phase truncation**: in-memory snip per stream, device reclamation
//!   at the minimum barrier across every stream.
//! * **Gap fill and rollback**: durable markers that survive recovery.
//! * **Replay recovery**: state is rebuilt from device upcalls after a
//!   restart.
//!
//! ## Example
//!
//! ```ignore
//! use plexlog::{LogBuffer, LogStoreOptions, LogStoreService};
//!
//! let service = LogStoreService::new(device);
//! let store = service.create_store(1, LogStoreOptions::append_only(0))?;
//!
//! let lsn = store.append_sync(LogBuffer::from_slice(b"payload"))?;
//! store.flush_sync(lsn)?;
//! assert_eq!(store.read_sync(lsn)?.as_slice(), b"payload");
//! ```

mod config;
mod device;
mod error;
mod record;
mod service;
mod slot;
mod store;
mod sync_wait;
mod tracker;
mod truncation;
mod types;

pub use config::LogStoreOptions;
pub use device::LogDevice;
pub use error::{Error, Result};
pub use record::{decode_record, encode_record, RecordHeader, RecordKind};
pub use service::LogStoreService;
pub use slot::{RecordSlot, SlotState};
pub use store::{LogStore, LogStoreStatus};
pub use tracker::StreamTracker;
pub use truncation::{TruncationBarrier, TruncationState};
pub use types::{
  Cookie, DeviceKey, LogBuffer, LogFoundCb, LogReadCb, LogReqCompCb, LogWriteCompCb, Lsn,
  ReadCompCb, ReplayDoneCb, RollbackDoneCb, StoreId, INVALID_LSN,
};
