//! Windowed per-stream tracking of issued and completed sequence numbers.
//!
//! Sequence numbers are dense in intent, so the tracker is a ring of slots
//! anchored at `base_lsn` rather than a hash map. Prefix truncation advances
//! the base; sparse inserts grow the window with vacant cells.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::slot::{RecordSlot, SlotState};
use crate::types::{Cookie, DeviceKey, LogBuffer, LogWriteCompCb, Lsn};

pub struct StreamTracker {
  /// Sequence number of `slots[0]`; the first live (non-truncated) position.
  base_lsn: Lsn,
  slots: VecDeque<Option<RecordSlot>>,

  /// Highest L such that every position in (base_lsn - 1, L] holds a slot.
  issued_upto: Lsn,
  /// Same, for slots that reached Completed or GapFilled.
  completed_upto: Lsn,
  /// Highest sequence number ever inserted.
  highest_seen: Lsn,
}

impl StreamTracker {
  pub fn new(start_lsn: Lsn, window_hint: usize) -> Self {
    Self {
      base_lsn: start_lsn,
      slots: VecDeque::with_capacity(window_hint),
      issued_upto: start_lsn - 1,
      completed_upto: start_lsn - 1,
      highest_seen: start_lsn - 1,
    }
  }

  pub fn base_lsn(&self) -> Lsn {
    self.base_lsn
  }

  pub fn issued_upto(&self) -> Lsn {
    self.issued_upto
  }

  pub fn completed_upto(&self) -> Lsn {
    self.completed_upto
  }

  pub fn highest_seen(&self) -> Lsn {
    self.highest_seen
  }

  fn index_of(&self, lsn: Lsn) -> usize {
    (lsn - self.base_lsn) as usize
  }

  /// Inserts a slot at `lsn`, growing the window as needed.
  ///
  /// Fails with `LsnTruncated` below the window base and `DuplicateLsn` if
  /// the position is already occupied.
  pub fn insert(&mut self, lsn: Lsn, slot: RecordSlot) -> Result<()> {
    if lsn < self.base_lsn {
      return Err(Error::LsnTruncated {
        lsn,
        truncated_upto: self.base_lsn - 1,
      });
    }

    let idx = self.index_of(lsn);
    while self.slots.len() <= idx {
      self.slots.push_back(None);
    }

    if self.slots[idx].is_some() {
      return Err(Error::DuplicateLsn(lsn));
    }

    self.slots[idx] = Some(slot);
    if lsn > self.highest_seen {
      self.highest_seen = lsn;
    }
    self.advance_cursors();
    Ok(())
  }

  /// Transitions `lsn` to Completed with its device key and returns the
  /// in-flight callback state so the caller can invoke it outside any lock.
  ///
  /// Completions arrive in arbitrary order; only the contiguous prefix moves
  /// the completed cursor. A completion for a gap marker records the key
  /// without a state change.
  pub fn complete(
    &mut self,
    lsn: Lsn,
    key: DeviceKey,
  ) -> Result<(Option<LogWriteCompCb>, Option<Cookie>)> {
    if lsn < self.base_lsn {
      return Err(Error::LsnTruncated {
        lsn,
        truncated_upto: self.base_lsn - 1,
      });
    }

    let idx = self.index_of(lsn);
    let slot = match self.slots.get_mut(idx) {
      Some(Some(slot)) => slot,
      _ => return Err(Error::NotFound(lsn)),
    };

    match slot.state {
      SlotState::Issued => {
        slot.state = SlotState::Completed;
        slot.device_key = Some(key);
      }
      SlotState::GapFilled => {
        slot.device_key = Some(key);
      }
      SlotState::Completed => return Err(Error::DuplicateLsn(lsn)),
    }

    let taken = (slot.comp_cb.take(), slot.cookie.take());
    self.advance_cursors();
    Ok(taken)
  }

  /// Takes the in-flight callback state of `lsn` without completing it.
  /// Used to deliver a device-reported write failure.
  pub fn take_callbacks(&mut self, lsn: Lsn) -> Option<(Option<LogWriteCompCb>, Option<Cookie>)> {
    if lsn < self.base_lsn {
      return None;
    }
    let idx = self.index_of(lsn);
    match self.slots.get_mut(idx) {
      Some(Some(slot)) => Some((slot.comp_cb.take(), slot.cookie.take())),
      _ => None,
    }
  }

  pub fn get(&self, lsn: Lsn) -> Result<&RecordSlot> {
    if lsn < self.base_lsn {
      return Err(Error::LsnTruncated {
        lsn,
        truncated_upto: self.base_lsn - 1,
      });
    }
    match self.slots.get(self.index_of(lsn)) {
      Some(Some(slot)) => Ok(slot),
      _ => Err(Error::NotFound(lsn)),
    }
  }

  /// Snapshot of the completed prefix starting at `from`: every Completed
  /// slot with a memory-resident payload, ascending. Gap markers and
  /// in-flight slots are skipped.
  pub fn snapshot_completed(&self, from: Lsn) -> Vec<(Lsn, LogBuffer)> {
    let start = from.max(self.base_lsn);
    let mut out = Vec::new();
    let mut lsn = start;
    while lsn <= self.completed_upto {
      if let Some(Some(slot)) = self.slots.get(self.index_of(lsn)) {
        if slot.state == SlotState::Completed {
          if let Some(buf) = &slot.buffer {
            out.push((lsn, buf.clone()));
          }
        }
      }
      lsn += 1;
    }
    out
  }

  /// Drops memory-resident payloads for completed slots at or below `upto`
  /// that can be re-read from the device by key. Returns the count released.
  pub fn release_buffers(&mut self, upto: Lsn) -> usize {
    let mut released = 0;
    let mut lsn = self.base_lsn;
    let end = upto.min(self.highest_seen);
    while lsn <= end {
      let idx = self.index_of(lsn);
      if let Some(Some(slot)) = self.slots.get_mut(idx) {
        if slot.state == SlotState::Completed
          && slot.device_key.is_some()
          && slot.buffer.take().is_some()
        {
          released += 1;
        }
      }
      lsn += 1;
    }
    released
  }

  /// Drops every slot at or below `upto` and advances the base. Returns the
  /// number of released slots and the maximum device key seen among them.
  pub fn truncate_prefix(&mut self, upto: Lsn) -> (usize, Option<DeviceKey>) {
    let mut released = 0;
    let mut max_key: Option<DeviceKey> = None;

    while self.base_lsn <= upto {
      match self.slots.pop_front() {
        Some(Some(slot)) => {
          released += 1;
          if let Some(key) = slot.device_key {
            if max_key.map_or(true, |m| key > m) {
              max_key = Some(key);
            }
          }
        }
        Some(None) => {}
        None => {
          self.base_lsn = upto + 1;
          break;
        }
      }
      self.base_lsn += 1;
    }

    if self.issued_upto < self.base_lsn - 1 {
      self.issued_upto = self.base_lsn - 1;
    }
    if self.completed_upto < self.base_lsn - 1 {
      self.completed_upto = self.base_lsn - 1;
    }
    if self.highest_seen < self.base_lsn - 1 {
      self.highest_seen = self.base_lsn - 1;
    }

    (released, max_key)
  }

  /// Removes every slot above `to_lsn`, refusing if any of them is still in
  /// flight. Cursors are clamped; the tail becomes re-assignable.
  pub fn rollback_tail(&mut self, to_lsn: Lsn) -> Result<usize> {
    if to_lsn >= self.highest_seen {
      return Ok(0);
    }
    if to_lsn < self.base_lsn - 1 {
      return Err(Error::LsnTruncated {
        lsn: to_lsn,
        truncated_upto: self.base_lsn - 1,
      });
    }

    let start_idx = self.index_of(to_lsn + 1);
    for (i, slot) in self.slots.iter().enumerate().skip(start_idx) {
      if let Some(slot) = slot {
        if slot.state == SlotState::Issued {
          return Err(Error::PendingIo {
            from: self.base_lsn + i as Lsn,
            to: self.highest_seen,
          });
        }
      }
    }

    let removed = self
      .slots
      .iter()
      .skip(start_idx)
      .filter(|s| s.is_some())
      .count();
    self.slots.truncate(start_idx);

    self.highest_seen = to_lsn;
    if self.issued_upto > to_lsn {
      self.issued_upto = to_lsn;
    }
    if self.completed_upto > to_lsn {
      self.completed_upto = to_lsn;
    }
    Ok(removed)
  }

  /// Re-anchors the window after replay: leading vacant cells are dropped
  /// (their sequence numbers were truncated before the crash) and both
  /// cursors are recomputed by a single left-to-right sweep.
  pub fn seal_recovery(&mut self) {
    while let Some(None) = self.slots.front() {
      self.slots.pop_front();
      self.base_lsn += 1;
    }
    if self.highest_seen < self.base_lsn - 1 {
      self.highest_seen = self.base_lsn - 1;
    }

    let mut issued = self.base_lsn - 1;
    let mut completed = self.base_lsn - 1;
    for (i, slot) in self.slots.iter().enumerate() {
      match slot {
        Some(slot) => {
          let lsn = self.base_lsn + i as Lsn;
          issued = lsn;
          if completed + 1 == lsn && slot.state >= SlotState::Completed {
            completed = lsn;
          }
        }
        None => break,
      }
    }
    self.issued_upto = issued;
    self.completed_upto = completed;
  }

  fn advance_cursors(&mut self) {
    loop {
      let next = self.issued_upto + 1;
      let idx = self.index_of(next);
      match self.slots.get(idx) {
        Some(Some(_)) => self.issued_upto = next,
        _ => break,
      }
    }
    loop {
      let next = self.completed_upto + 1;
      let idx = self.index_of(next);
      match self.slots.get(idx) {
        Some(Some(slot)) if slot.state >= SlotState::Completed => self.completed_upto = next,
        _ => break,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::LogBuffer;

  fn issued_slot() -> RecordSlot {
    RecordSlot::issued(LogBuffer::from_slice(b"payload"), None, None)
  }

  fn key(offset: u64) -> DeviceKey {
    DeviceKey::new(0, offset)
  }

  #[test]
  fn test_dense_insert_advances_issued_cursor() {
    let mut t = StreamTracker::new(1, 16);
    for lsn in 1..=5 {
      t.insert(lsn, issued_slot()).unwrap();
    }
    assert_eq!(t.issued_upto(), 5);
    assert_eq!(t.completed_upto(), 0);
    assert_eq!(t.highest_seen(), 5);
  }

  #[test]
  fn test_out_of_order_completion_moves_prefix_only() {
    let mut t = StreamTracker::new(1, 16);
    for lsn in 1..=5 {
      t.insert(lsn, issued_slot()).unwrap();
    }

    t.complete(3, key(0)).unwrap();
    assert_eq!(t.completed_upto(), 0);

    t.complete(1, key(1)).unwrap();
    assert_eq!(t.completed_upto(), 1);

    t.complete(5, key(2)).unwrap();
    assert_eq!(t.completed_upto(), 1);

    t.complete(2, key(3)).unwrap();
    assert_eq!(t.completed_upto(), 3);

    t.complete(4, key(4)).unwrap();
    assert_eq!(t.completed_upto(), 5);
  }

  #[test]
  fn test_sparse_insert_leaves_cursor_behind() {
    let mut t = StreamTracker::new(0, 16);
    t.insert(0, issued_slot()).unwrap();
    t.insert(4, issued_slot()).unwrap();

    assert_eq!(t.issued_upto(), 0);
    assert_eq!(t.highest_seen(), 4);

    // Filling the hole catches the cursor up past both.
    for lsn in 1..=3 {
      t.insert(lsn, issued_slot()).unwrap();
    }
    assert_eq!(t.issued_upto(), 4);
  }

  #[test]
  fn test_duplicate_insert_rejected() {
    let mut t = StreamTracker::new(0, 16);
    t.insert(2, issued_slot()).unwrap();
    assert!(matches!(t.insert(2, issued_slot()), Err(Error::DuplicateLsn(2))));
  }

  #[test]
  fn test_insert_below_base_rejected() {
    let mut t = StreamTracker::new(10, 16);
    assert!(matches!(
      t.insert(9, issued_slot()),
      Err(Error::LsnTruncated { lsn: 9, truncated_upto: 9 })
    ));
  }

  #[test]
  fn test_gap_counts_for_both_cursors() {
    let mut t = StreamTracker::new(1, 16);
    t.insert(1, issued_slot()).unwrap();
    t.complete(1, key(0)).unwrap();
    t.insert(2, RecordSlot::gap()).unwrap();
    t.insert(3, issued_slot()).unwrap();
    t.complete(3, key(1)).unwrap();

    assert_eq!(t.issued_upto(), 3);
    assert_eq!(t.completed_upto(), 3);
  }

  #[test]
  fn test_duplicate_completion_rejected() {
    let mut t = StreamTracker::new(0, 16);
    t.insert(0, issued_slot()).unwrap();
    t.complete(0, key(0)).unwrap();
    assert!(matches!(t.complete(0, key(1)), Err(Error::DuplicateLsn(0))));
  }

  #[test]
  fn test_truncate_prefix_advances_base_and_reports_max_key() {
    let mut t = StreamTracker::new(1, 16);
    for lsn in 1..=6 {
      t.insert(lsn, issued_slot()).unwrap();
    }
    // Completions land out of order, so keys are not aligned with lsns.
    t.complete(2, key(10)).unwrap();
    t.complete(1, key(11)).unwrap();
    t.complete(3, key(12)).unwrap();
    t.complete(4, key(13)).unwrap();

    let (released, max_key) = t.truncate_prefix(3);
    assert_eq!(released, 3);
    assert_eq!(max_key, Some(key(12)));
    assert_eq!(t.base_lsn(), 4);

    assert!(matches!(t.get(3), Err(Error::LsnTruncated { .. })));
    assert!(t.get(4).is_ok());
  }

  #[test]
  fn test_rollback_refuses_pending_io() {
    let mut t = StreamTracker::new(1, 16);
    for lsn in 1..=4 {
      t.insert(lsn, issued_slot()).unwrap();
    }
    t.complete(1, key(0)).unwrap();
    t.complete(2, key(1)).unwrap();

    assert!(matches!(t.rollback_tail(1), Err(Error::PendingIo { .. })));
  }

  #[test]
  fn test_rollback_clamps_cursors() {
    let mut t = StreamTracker::new(1, 16);
    for lsn in 1..=4 {
      t.insert(lsn, issued_slot()).unwrap();
      t.complete(lsn, key(lsn as u64)).unwrap();
    }

    let removed = t.rollback_tail(2).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(t.highest_seen(), 2);
    assert_eq!(t.issued_upto(), 2);
    assert_eq!(t.completed_upto(), 2);

    // The tail is re-assignable.
    t.insert(3, issued_slot()).unwrap();
    assert_eq!(t.issued_upto(), 3);
  }

  #[test]
  fn test_seal_recovery_reanchors_and_sweeps() {
    let mut t = StreamTracker::new(0, 16);
    // Replay delivers lsns 3..=7 in device order, not lsn order.
    for lsn in [5, 3, 7, 4, 6] {
      t.insert(lsn, RecordSlot::completed(key(lsn as u64), LogBuffer::from_slice(b"r")))
        .unwrap();
    }
    t.seal_recovery();

    assert_eq!(t.base_lsn(), 3);
    assert_eq!(t.issued_upto(), 7);
    assert_eq!(t.completed_upto(), 7);
    assert_eq!(t.highest_seen(), 7);
  }

  #[test]
  fn test_seal_recovery_empty_window() {
    let mut t = StreamTracker::new(5, 16);
    t.seal_recovery();
    assert_eq!(t.base_lsn(), 5);
    assert_eq!(t.issued_upto(), 4);
    assert_eq!(t.completed_upto(), 4);
  }
}
