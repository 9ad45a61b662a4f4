//! The shared log device seam.
//!
//! Every log store multiplexed over one device talks to it through this
//! trait. The device owns placement, batching, fsync, and retry; the stores
//! own per-stream bookkeeping. Results flow back asynchronously as upcalls
//! on the registered [`LogStore`](crate::LogStore) handles:
//!
//! - `submit_write` completes via `LogStore::on_write_completion`, carrying
//!   the [`DeviceKey`] assigned at flush time (or the failure status).
//! - `request_flush` leads to `LogStore::on_batch_completion` once a flush
//!   batch is durable.
//! - `record_rollback` completes via `LogStore::on_rollback_completion`.
//! - `replay` re-delivers every surviving entry through
//!   `LogStore::on_log_found` in device-key order, then calls
//!   `LogStore::on_replay_done` on each registered store.
//!
//! Upcalls originate from the device's I/O threads and may run concurrently
//! with user calls into the store.

use std::sync::Arc;

use crate::error::Result;
use crate::record::RecordKind;
use crate::store::LogStore;
use crate::types::{DeviceKey, LogBuffer, Lsn, ReadCompCb, StoreId};

pub trait LogDevice: Send + Sync {
  /// Registers a store for upcall routing. Fails if the id is taken.
  fn register_store(&self, store: Arc<LogStore>) -> Result<()>;

  /// Detaches a store; in-flight requests for it surface error completions.
  fn unregister_store(&self, store_id: StoreId);

  /// Queues one record for placement. Completion is reported to the owning
  /// store with the assigned device key.
  fn submit_write(&self, store_id: StoreId, lsn: Lsn, kind: RecordKind, buf: LogBuffer) -> Result<()>;

  /// Fetches the payload stored at `key`. The callback always fires, with
  /// the payload or the failure.
  fn submit_read(&self, key: DeviceKey, cb: ReadCompCb);

  /// Asks the device to flush everything issued by `store_id` up to
  /// `upto_lsn`. Durability is announced via batch-completion upcalls.
  fn request_flush(&self, store_id: StoreId, upto_lsn: Lsn) -> Result<()>;

  /// Durably reclaims every record at or below `upto_key`. The key must be
  /// the minimum across all streams sharing the device; records of multiple
  /// streams cohabit device blocks.
  fn truncate(&self, upto_key: DeviceKey) -> Result<()>;

  /// Durably records that `store_id`'s tail above `to_lsn` is void, so
  /// replay never resurrects it.
  fn record_rollback(&self, store_id: StoreId, to_lsn: Lsn) -> Result<()>;

  /// Re-delivers every surviving entry to its registered store, then signals
  /// replay end on each store.
  fn replay(&self) -> Result<()>;
}
