use crate::types::{Cookie, DeviceKey, LogBuffer, LogWriteCompCb};

/// Lifecycle of a tracked sequence number.
///
/// Transitions are forward-only: `Issued -> Completed` on device completion,
/// and any state to truncated when the window prefix is snipped. Truncated
/// entries are not stored; they are implied by the window base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotState {
  /// Write handed to the device, completion pending.
  Issued,
  /// Durably placed; `device_key` identifies where it landed.
  Completed,
  /// Sequence number consumed by a durable gap marker; unreadable.
  GapFilled,
}

/// One tracked entry per sequence number ever introduced.
pub struct RecordSlot {
  pub state: SlotState,
  pub device_key: Option<DeviceKey>,
  /// Payload handle, kept so read-after-write is served from memory. Released
  /// when the slot is truncated.
  pub buffer: Option<LogBuffer>,
  /// Per-request context, only present while the write is in flight.
  pub cookie: Option<Cookie>,
  /// Per-request completion callback, only present while the write is in
  /// flight. Taken (not invoked) under the store lock.
  pub comp_cb: Option<LogWriteCompCb>,
}

impl RecordSlot {
  pub fn issued(buffer: LogBuffer, cookie: Option<Cookie>, comp_cb: Option<LogWriteCompCb>) -> Self {
    Self {
      state: SlotState::Issued,
      device_key: None,
      buffer: Some(buffer),
      cookie,
      comp_cb,
    }
  }

  /// A slot rebuilt from a replayed entry: already durable.
  pub fn completed(device_key: DeviceKey, buffer: LogBuffer) -> Self {
    Self {
      state: SlotState::Completed,
      device_key: Some(device_key),
      buffer: Some(buffer),
      cookie: None,
      comp_cb: None,
    }
  }

  pub fn gap() -> Self {
    Self {
      state: SlotState::GapFilled,
      device_key: None,
      buffer: None,
      cookie: None,
      comp_cb: None,
    }
  }
}
