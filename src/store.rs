//! The public per-stream log store.
//!
//! A `LogStore` is one logical append-only log multiplexed over the shared
//! device. It tracks issued and completed sequence numbers, serves reads
//! from memory or by device key, and runs the stream half of the two-phase
//! truncation protocol. All device upcalls (`on_*`) may arrive concurrently
//! with user calls from any thread.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::LogStoreOptions;
use crate::device::LogDevice;
use crate::error::{Error, Result};
use crate::record::RecordKind;
use crate::slot::{RecordSlot, SlotState};
use crate::sync_wait::SyncWaiter;
use crate::tracker::StreamTracker;
use crate::truncation::{TruncationBarrier, TruncationState};
use crate::types::{
  Cookie, DeviceKey, LogBuffer, LogFoundCb, LogReadCb, LogReqCompCb, LogWriteCompCb, Lsn,
  ReplayDoneCb, RollbackDoneCb, StoreId, INVALID_LSN,
};

/// Point-in-time view of a store's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStoreStatus {
  pub store_id: StoreId,
  pub first_lsn: Lsn,
  pub highest_seen: Lsn,
  pub issued_upto: Lsn,
  pub completed_upto: Lsn,
  pub truncated_upto: Lsn,
  pub pending_barriers: usize,
  pub next_seq: Lsn,
}

struct StoreInner {
  tracker: StreamTracker,
  truncation: TruncationState,
  /// Lowest sequence number seen during the current replay.
  first_seen: Option<Lsn>,
  rollback_cb: Option<RollbackDoneCb>,
}

enum ReadSource {
  Memory(LogBuffer),
  Device(DeviceKey),
}

pub struct LogStore {
  store_id: StoreId,
  append_mode: bool,
  device: Arc<dyn LogDevice>,

  /// Next sequence number an append will claim.
  next_seq: AtomicI64,

  inner: Mutex<StoreInner>,

  // Cursor mirrors: written under the inner lock with release ordering,
  // readable without it. Readers needing coherence across them take the lock.
  issued_upto: AtomicI64,
  completed_upto: AtomicI64,
  highest_seen: AtomicI64,
  truncated_upto: AtomicI64,

  /// Highest sequence number made durable since the previous flush batch.
  flush_batch_max_lsn: AtomicI64,

  sync_flush_mtx: Mutex<()>,
  sync_flush_cv: Condvar,

  comp_cb: RwLock<Option<LogReqCompCb>>,
  found_cb: RwLock<Option<LogFoundCb>>,
  replay_done_cb: RwLock<Option<ReplayDoneCb>>,

  closed: AtomicBool,
}

impl LogStore {
  pub fn new(store_id: StoreId, device: Arc<dyn LogDevice>, options: LogStoreOptions) -> Result<Self> {
    options.validate()?;
    let start = options.start_lsn;

    Ok(Self {
      store_id,
      append_mode: options.append_mode,
      device,
      next_seq: AtomicI64::new(start),
      inner: Mutex::new(StoreInner {
        tracker: StreamTracker::new(start, options.tracker_window_hint),
        truncation: TruncationState::new(start),
        first_seen: None,
        rollback_cb: None,
      }),
      issued_upto: AtomicI64::new(start - 1),
      completed_upto: AtomicI64::new(start - 1),
      highest_seen: AtomicI64::new(start - 1),
      truncated_upto: AtomicI64::new(start - 1),
      flush_batch_max_lsn: AtomicI64::new(INVALID_LSN),
      sync_flush_mtx: Mutex::new(()),
      sync_flush_cv: Condvar::new(),
      comp_cb: RwLock::new(None),
      found_cb: RwLock::new(None),
      replay_done_cb: RwLock::new(None),
      closed: AtomicBool::new(false),
    })
  }

  pub fn store_id(&self) -> StoreId {
    self.store_id
  }

  /// The next sequence number an append would claim.
  pub fn seq_num(&self) -> Lsn {
    self.next_seq.load(Ordering::Acquire)
  }

  // --- Callback registration ---

  /// Registers the default write completion callback, used for writes that
  /// carry no callback of their own.
  pub fn register_req_comp_cb(&self, cb: LogReqCompCb) {
    *self.comp_cb.write() = Some(cb);
  }

  /// Registers the callback invoked for every data entry found during
  /// recovery. Optional if replayed entries need no application handling.
  pub fn register_log_found_cb(&self, cb: LogFoundCb) {
    *self.found_cb.write() = Some(cb);
  }

  /// Registers the callback invoked once replay has delivered everything.
  pub fn register_log_replay_done_cb(&self, cb: ReplayDoneCb) {
    *self.replay_done_cb.write() = Some(cb);
  }

  // --- Writes ---

  /// Issues a write at an explicit sequence number. Rejected in append mode.
  ///
  /// The slot becomes visible as issued immediately; the completion callback
  /// (or the registered default) fires once the device reports placement.
  pub fn write_async(
    &self,
    lsn: Lsn,
    buf: LogBuffer,
    cookie: Option<Cookie>,
    cb: Option<LogWriteCompCb>,
  ) -> Result<()> {
    if self.append_mode {
      return Err(Error::Config(
        "explicit-lsn writes are rejected in append mode".into(),
      ));
    }
    self.do_write(Some(lsn), buf, cookie, cb)?;
    Ok(())
  }

  /// Allocates the next sequence number and issues a write there. Returns
  /// the allocated number; completion is reported like `write_async`.
  pub fn append_async(
    &self,
    buf: LogBuffer,
    cookie: Option<Cookie>,
    cb: Option<LogWriteCompCb>,
  ) -> Result<Lsn> {
    self.do_write(None, buf, cookie, cb)
  }

  /// Blocking variant of `write_async`. Returns the device key once the
  /// completion has fired. Placement, not durability; pair with
  /// `flush_sync` when durability is required.
  pub fn write_sync(&self, lsn: Lsn, buf: LogBuffer) -> Result<DeviceKey> {
    if self.append_mode {
      return Err(Error::Config(
        "explicit-lsn writes are rejected in append mode".into(),
      ));
    }
    let waiter = Arc::new(SyncWaiter::new());
    let cell = waiter.clone();
    let cb: LogWriteCompCb = Box::new(move |_lsn, status, _cookie| cell.complete(status));

    self.do_write(Some(lsn), buf, None, Some(cb))?;
    waiter.wait()
  }

  /// Blocking variant of `append_async`: returns the allocated sequence
  /// number once its completion has fired.
  pub fn append_sync(&self, buf: LogBuffer) -> Result<Lsn> {
    let waiter = Arc::new(SyncWaiter::new());
    let cell = waiter.clone();
    let cb: LogWriteCompCb = Box::new(move |_lsn, status, _cookie| cell.complete(status));

    let lsn = self.append_async(buf, None, Some(cb))?;
    waiter.wait()?;
    Ok(lsn)
  }

  /// Inserts the issued slot and claims the sequence number. `None`
  /// allocates the next one. Allocation, explicit placement, and the
  /// counter bump all happen under the store lock, so an append can never
  /// land on a number an explicit write is claiming concurrently.
  fn do_write(
    &self,
    lsn: Option<Lsn>,
    buf: LogBuffer,
    cookie: Option<Cookie>,
    cb: Option<LogWriteCompCb>,
  ) -> Result<Lsn> {
    self.ensure_open()?;
    let lsn = {
      let mut inner = self.inner.lock();
      let lsn = match lsn {
        Some(lsn) => {
          let truncated_upto = inner.truncation.truncated_upto();
          if lsn <= truncated_upto {
            return Err(Error::LsnTruncated { lsn, truncated_upto });
          }
          lsn
        }
        None => self.next_seq.fetch_add(1, Ordering::AcqRel),
      };
      inner.tracker.insert(lsn, RecordSlot::issued(buf.clone(), cookie, cb))?;
      self.bump_next_seq(lsn);
      self.publish_cursors(&inner);
      lsn
    };
    self.device.submit_write(self.store_id, lsn, RecordKind::Data, buf)?;
    Ok(lsn)
  }

  // --- Reads ---

  /// Reads the payload at `lsn`, blocking on a device fetch if the buffer
  /// is no longer memory-resident.
  pub fn read_sync(&self, lsn: Lsn) -> Result<LogBuffer> {
    self.ensure_open()?;
    match self.locate(lsn)? {
      ReadSource::Memory(buf) => Ok(buf),
      ReadSource::Device(key) => {
        let waiter = Arc::new(SyncWaiter::new());
        let cell = waiter.clone();
        self.device.submit_read(key, Box::new(move |status| cell.complete(status)));
        waiter.wait()
      }
    }
  }

  /// Asynchronous read; every outcome, including fail-fast lookup errors,
  /// is delivered through `cb`.
  pub fn read_async(&self, lsn: Lsn, cookie: Option<Cookie>, cb: LogReadCb) {
    if self.closed.load(Ordering::Acquire) {
      cb(lsn, Err(Error::Closed), cookie);
      return;
    }
    match self.locate(lsn) {
      Ok(ReadSource::Memory(buf)) => cb(lsn, Ok(buf), cookie),
      Ok(ReadSource::Device(key)) => {
        self
          .device
          .submit_read(key, Box::new(move |status| cb(lsn, status, cookie)));
      }
      Err(e) => cb(lsn, Err(e), cookie),
    }
  }

  fn locate(&self, lsn: Lsn) -> Result<ReadSource> {
    let inner = self.inner.lock();
    let truncated_upto = inner.truncation.truncated_upto();
    if lsn <= truncated_upto {
      return Err(Error::LsnTruncated { lsn, truncated_upto });
    }
    let slot = inner.tracker.get(lsn)?;
    match slot.state {
      SlotState::GapFilled => Err(Error::Gap(lsn)),
      SlotState::Issued | SlotState::Completed => {
        if let Some(buf) = &slot.buffer {
          return Ok(ReadSource::Memory(buf.clone()));
        }
        match slot.device_key {
          Some(key) => Ok(ReadSource::Device(key)),
          None => Err(Error::NotFound(lsn)),
        }
      }
    }
  }

  /// Releases memory-resident payloads at or below `upto_lsn`. Later reads
  /// fetch them back from the device by key; only completed, durably placed
  /// entries are eligible. Returns the number of payloads released.
  pub fn release_buffers(&self, upto_lsn: Lsn) -> usize {
    self.inner.lock().tracker.release_buffers(upto_lsn)
  }

  /// Walks completed entries from `start_lsn` in ascending order, stopping
  /// when `cb` returns false. The range is a snapshot of the completed
  /// cursor at entry; concurrent appends may or may not be observed.
  /// In-flight and gap-filled positions are skipped.
  pub fn foreach<F>(&self, start_lsn: Lsn, mut cb: F)
  where
    F: FnMut(Lsn, &LogBuffer) -> bool,
  {
    let entries = self.inner.lock().tracker.snapshot_completed(start_lsn);
    for (lsn, buf) in entries {
      if !cb(lsn, &buf) {
        break;
      }
    }
  }

  // --- Contiguity queries ---

  /// Highest sequence number such that everything after `from` up to it has
  /// been issued. Returns `from` when there is no new progress.
  pub fn get_contiguous_issued_seq_num(&self, from: Lsn) -> Lsn {
    let upto = self.issued_upto.load(Ordering::Acquire);
    if from < upto {
      upto
    } else {
      from
    }
  }

  /// Same shape as `get_contiguous_issued_seq_num`, for completions.
  pub fn get_contiguous_completed_seq_num(&self, from: Lsn) -> Lsn {
    let upto = self.completed_upto.load(Ordering::Acquire);
    if from < upto {
      upto
    } else {
      from
    }
  }

  /// Last sequence number truncated away. After recovery this is one below
  /// the first surviving sequence number.
  pub fn truncated_upto(&self) -> Lsn {
    self.truncated_upto.load(Ordering::Acquire)
  }

  pub fn status(&self) -> LogStoreStatus {
    let inner = self.inner.lock();
    LogStoreStatus {
      store_id: self.store_id,
      first_lsn: inner.tracker.base_lsn(),
      highest_seen: inner.tracker.highest_seen(),
      issued_upto: inner.tracker.issued_upto(),
      completed_upto: inner.tracker.completed_upto(),
      truncated_upto: inner.truncation.truncated_upto(),
      pending_barriers: inner.truncation.barrier_count(),
      next_seq: self.next_seq.load(Ordering::Acquire),
    }
  }

  // --- Flush ---

  /// Blocks until every sequence number up to `upto_lsn` has completed.
  /// `INVALID_LSN` waits for everything issued so far. Wakes on every batch
  /// completion and re-checks the cursor.
  pub fn flush_sync(&self, upto_lsn: Lsn) -> Result<()> {
    self.ensure_open()?;
    let target = if upto_lsn == INVALID_LSN {
      self.highest_seen.load(Ordering::Acquire)
    } else {
      upto_lsn
    };
    if target <= self.completed_upto.load(Ordering::Acquire) {
      return Ok(());
    }

    self.device.request_flush(self.store_id, target)?;

    let mut guard = self.sync_flush_mtx.lock();
    while self.completed_upto.load(Ordering::Acquire) < target {
      if self.closed.load(Ordering::Acquire) {
        return Err(Error::Closed);
      }
      self.sync_flush_cv.wait(&mut guard);
    }
    Ok(())
  }

  // --- Truncation ---

  /// Phase one: snips the in-memory prefix up to `upto_lsn` (inclusive),
  /// releases the buffers, and records a truncation barrier. Reads and
  /// writes at or below now fail. Requires the prefix to be fully completed.
  ///
  /// With `in_memory_only` unset the store immediately runs its own phase
  /// two against the device. When several stores share the device, prefer
  /// the manager-level sweep so the reclamation respects the global minimum
  /// in one device pass.
  pub fn truncate(&self, upto_lsn: Lsn, in_memory_only: bool) -> Result<()> {
    self.ensure_open()?;
    {
      let mut inner = self.inner.lock();
      if upto_lsn <= inner.truncation.truncated_upto() {
        return Ok(());
      }
      let completed_upto = inner.tracker.completed_upto();
      if upto_lsn > completed_upto {
        return Err(Error::PendingIo {
          from: completed_upto + 1,
          to: upto_lsn,
        });
      }

      let (released, max_key) = inner.tracker.truncate_prefix(upto_lsn);
      inner.truncation.record_truncation(upto_lsn, max_key);
      self.publish_cursors(&inner);
      debug!(
        target: "plexlog",
        store_id = self.store_id,
        upto_lsn,
        released,
        "truncated in-memory prefix"
      );
    }

    if !in_memory_only {
      if let Some(barrier) = self.pre_device_truncation() {
        self.device.truncate(barrier.key)?;
        self.post_device_truncation(barrier.key);
      }
    }
    Ok(())
  }

  /// The oldest unconfirmed barrier, this store's input to the global
  /// minimum across every store sharing the device. `None` means this store
  /// does not constrain device truncation.
  pub fn pre_device_truncation(&self) -> Option<TruncationBarrier> {
    self.inner.lock().truncation.oldest_barrier()
  }

  /// Phase two: the device has durably reclaimed everything at or below
  /// `trunc_key`; drop the barriers it covered.
  pub fn post_device_truncation(&self, trunc_key: DeviceKey) {
    let mut inner = self.inner.lock();
    let discarded = inner.truncation.confirm_device_truncation(trunc_key);
    if discarded > 0 {
      debug!(
        target: "plexlog",
        store_id = self.store_id,
        %trunc_key,
        discarded,
        "device truncation confirmed"
      );
    }
  }

  // --- Gaps and rollback ---

  /// Consumes `lsn` with a durable gap marker so the contiguity cursors can
  /// move past it. The position becomes unreadable.
  pub fn fill_gap(&self, lsn: Lsn) -> Result<()> {
    self.ensure_open()?;
    {
      let mut inner = self.inner.lock();
      let truncated_upto = inner.truncation.truncated_upto();
      if lsn <= truncated_upto {
        return Err(Error::LsnTruncated { lsn, truncated_upto });
      }
      inner.tracker.insert(lsn, RecordSlot::gap())?;
      self.bump_next_seq(lsn);
      self.publish_cursors(&inner);
    }
    self.device.submit_write(self.store_id, lsn, RecordKind::Gap, LogBuffer::empty())
  }

  /// Erases the tail above `to_lsn`, resets the append counter to
  /// `to_lsn + 1`, and records a durable rollback marker. `cb` fires once
  /// the marker is durable. Fails with `PendingIo` while any sequence
  /// number in the tail is still in flight; drain first.
  pub fn rollback_async(&self, to_lsn: Lsn, cb: Option<RollbackDoneCb>) -> Result<()> {
    self.ensure_open()?;
    {
      let mut inner = self.inner.lock();
      let truncated_upto = inner.truncation.truncated_upto();
      if to_lsn < truncated_upto {
        return Err(Error::LsnTruncated { lsn: to_lsn, truncated_upto });
      }
      let removed = inner.tracker.rollback_tail(to_lsn)?;
      inner.rollback_cb = cb;
      // Reset the counter before releasing the lock; a concurrent append
      // must not allocate above the tail being erased.
      self.next_seq.store(to_lsn + 1, Ordering::Release);
      self.publish_cursors(&inner);
      debug!(
        target: "plexlog",
        store_id = self.store_id,
        to_lsn,
        removed,
        "rolled back tail"
      );
    }
    self.device.record_rollback(self.store_id, to_lsn)
  }

  // --- Device upcalls ---

  /// Write completion from the device's I/O threads. Out-of-order arrival
  /// is absorbed; only the contiguous prefix advances the completed cursor.
  pub fn on_write_completion(&self, lsn: Lsn, status: Result<DeviceKey>) {
    match status {
      Ok(key) => {
        let (taken, is_gap) = {
          let mut inner = self.inner.lock();
          match inner.tracker.complete(lsn, key) {
            Ok(taken) => {
              let is_gap = inner
                .tracker
                .get(lsn)
                .map_or(false, |slot| slot.state == SlotState::GapFilled);
              self.publish_cursors(&inner);
              (taken, is_gap)
            }
            Err(e) => {
              drop(inner);
              warn!(
                target: "plexlog",
                store_id = self.store_id,
                lsn,
                error = %e,
                "dropping completion for unknown or truncated lsn"
              );
              return;
            }
          }
        };
        self.flush_batch_max_lsn.fetch_max(lsn, Ordering::AcqRel);

        // Gap markers complete silently; only data writes reach the user.
        if !is_gap {
          let (cb, cookie) = taken;
          let default_cb = self.comp_cb.read().clone();
          if let Some(cb) = cb {
            cb(lsn, Ok(key), cookie);
          } else if let Some(default_cb) = default_cb {
            default_cb(lsn, Ok(key), cookie);
          }
        }
      }
      Err(e) => {
        let taken = self.inner.lock().tracker.take_callbacks(lsn);
        warn!(
          target: "plexlog",
          store_id = self.store_id,
          lsn,
          error = %e,
          "write failed on device"
        );
        let default_cb = self.comp_cb.read().clone();
        match taken {
          Some((Some(cb), cookie)) => cb(lsn, Err(e), cookie),
          Some((None, cookie)) => {
            if let Some(default_cb) = default_cb {
              default_cb(lsn, Err(e), cookie);
            }
          }
          None => {}
        }
        // Failed writes also unblock flush waiters; they re-check and keep
        // waiting unless the store is closing.
        let _guard = self.sync_flush_mtx.lock();
        drop(_guard);
        self.sync_flush_cv.notify_all();
      }
    }
  }

  /// A flush batch became durable. Wakes every blocked `flush_sync` caller.
  pub fn on_batch_completion(&self, flush_key: DeviceKey) {
    let batch_max_lsn = self.flush_batch_max_lsn.swap(INVALID_LSN, Ordering::AcqRel);
    debug!(
      target: "plexlog",
      store_id = self.store_id,
      %flush_key,
      batch_max_lsn,
      "flush batch completed"
    );
    let _guard = self.sync_flush_mtx.lock();
    drop(_guard);
    self.sync_flush_cv.notify_all();
  }

  /// The rollback marker is durable; hand the confirmation to the caller.
  pub fn on_rollback_completion(&self, to_lsn: Lsn) {
    let cb = self.inner.lock().rollback_cb.take();
    if let Some(cb) = cb {
      cb(to_lsn);
    }
  }

  /// Replay upcall for one surviving entry. `buf` is `None` for gap
  /// markers. Entries arrive in device-key order, which is not sequence
  /// order.
  pub fn on_log_found(&self, lsn: Lsn, key: DeviceKey, _flush_key: DeviceKey, buf: Option<LogBuffer>) {
    {
      let mut inner = self.inner.lock();
      let slot = match &buf {
        Some(buf) => RecordSlot::completed(key, buf.clone()),
        None => {
          let mut slot = RecordSlot::gap();
          slot.device_key = Some(key);
          slot
        }
      };
      if let Err(e) = inner.tracker.insert(lsn, slot) {
        warn!(
          target: "plexlog",
          store_id = self.store_id,
          lsn,
          error = %e,
          "skipping stale replay entry"
        );
        return;
      }
      inner.first_seen = Some(inner.first_seen.map_or(lsn, |f| f.min(lsn)));
      self.bump_next_seq(lsn);
      self.publish_cursors(&inner);
    }

    if let Some(buf) = buf {
      let cb = self.found_cb.read().clone();
      if let Some(cb) = cb {
        cb(lsn, buf);
      }
    }
  }

  /// Replay end: re-anchor the window, sweep the cursors, and report the
  /// pre-crash truncation point as one below the first surviving entry.
  pub fn on_replay_done(&self) {
    {
      let mut inner = self.inner.lock();
      inner.tracker.seal_recovery();
      if let Some(first) = inner.first_seen {
        inner.truncation.set_recovered(first - 1);
      }
      self.publish_cursors(&inner);
    }
    let cb = self.replay_done_cb.read().clone();
    if let Some(cb) = cb {
      cb();
    }
  }

  // --- Lifecycle ---

  /// Marks the store closed and wakes blocked flush callers. New operations
  /// fail; the device fails whatever is still in flight.
  pub(crate) fn close(&self) {
    self.closed.store(true, Ordering::Release);
    let _guard = self.sync_flush_mtx.lock();
    drop(_guard);
    self.sync_flush_cv.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(Error::Closed);
    }
    Ok(())
  }

  fn publish_cursors(&self, inner: &StoreInner) {
    self.issued_upto.store(inner.tracker.issued_upto(), Ordering::Release);
    self.completed_upto.store(inner.tracker.completed_upto(), Ordering::Release);
    self.highest_seen.store(inner.tracker.highest_seen(), Ordering::Release);
    self.truncated_upto.store(inner.truncation.truncated_upto(), Ordering::Release);
  }

  /// Keeps the append counter ahead of explicitly placed sequence numbers.
  /// Callers hold the store lock, which serializes every counter mutation
  /// against allocation in `do_write`.
  fn bump_next_seq(&self, lsn: Lsn) {
    self.next_seq.fetch_max(lsn + 1, Ordering::AcqRel);
  }
}
