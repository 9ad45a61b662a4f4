//! Per-stream truncation bookkeeping.
//!
//! Truncation is two-phase: the stream first snips its in-memory prefix and
//! remembers a barrier `(lsn, device_key)`, then the device durably reclaims
//! space once the owning manager has taken the minimum barrier across every
//! stream sharing the device. This module holds one stream's half of that
//! protocol.

use crate::types::{DeviceKey, Lsn};

/// A checkpoint remembered at an in-memory truncation: the truncated-upto
/// sequence number and the highest device key its records occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationBarrier {
  pub lsn: Lsn,
  pub key: DeviceKey,
}

#[derive(Debug)]
pub struct TruncationState {
  /// Last sequence number truncated in memory; reads at or below fail.
  truncated_upto: Lsn,
  /// Barriers not yet confirmed by the device, ordered by lsn. Keys are
  /// non-decreasing because each barrier carries the max key of a growing
  /// prefix.
  barriers: Vec<TruncationBarrier>,
  /// Highest barrier the device has confirmed reclaimed.
  confirmed: Option<TruncationBarrier>,
}

impl TruncationState {
  pub fn new(start_lsn: Lsn) -> Self {
    Self {
      truncated_upto: start_lsn - 1,
      barriers: Vec::new(),
      confirmed: None,
    }
  }

  pub fn truncated_upto(&self) -> Lsn {
    self.truncated_upto
  }

  pub fn barrier_count(&self) -> usize {
    self.barriers.len()
  }

  /// Highest device-confirmed reclamation point, if any.
  pub fn confirmed(&self) -> Option<TruncationBarrier> {
    self.confirmed
  }

  /// Records an in-memory truncation up to `upto`. `key` is the highest
  /// device key among the released records; `None` means the prefix carried
  /// no flushed record, in which case there is nothing for the device to
  /// reclaim and no barrier is kept.
  pub fn record_truncation(&mut self, upto: Lsn, key: Option<DeviceKey>) {
    debug_assert!(upto > self.truncated_upto);
    self.truncated_upto = upto;
    if let Some(key) = key {
      self.barriers.push(TruncationBarrier { lsn: upto, key });
    }
  }

  /// The oldest unconfirmed barrier; what this stream offers to the global
  /// minimum computation. `None` means this stream does not constrain the
  /// device (no I/O since the last confirmed truncation).
  pub fn oldest_barrier(&self) -> Option<TruncationBarrier> {
    self.barriers.first().copied()
  }

  /// Discards every barrier the device truncation at `key` covered and
  /// advances the confirmed boundary. Returns the number discarded.
  pub fn confirm_device_truncation(&mut self, key: DeviceKey) -> usize {
    let split = self
      .barriers
      .iter()
      .position(|b| b.key > key)
      .unwrap_or(self.barriers.len());
    if split > 0 {
      self.confirmed = Some(self.barriers[split - 1]);
      self.barriers.drain(..split);
    }
    split
  }

  /// Resets the truncation point after replay: everything before the first
  /// surviving sequence number is gone from the device.
  pub fn set_recovered(&mut self, truncated_upto: Lsn) {
    self.truncated_upto = truncated_upto;
  }
}
