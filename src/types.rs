use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Log sequence number. Per-store, monotonic, dense in intent.
pub type Lsn = i64;

/// Sentinel for "no sequence number".
pub const INVALID_LSN: Lsn = i64::MIN;

/// Identifier of a log store within the shared device.
pub type StoreId = u32;

/// Opaque ordered position emitted by the log device for every durable
/// record. The store never interprets the fields beyond their total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
  pub dev_id: u32,
  pub offset: u64,
}

impl DeviceKey {
  pub const fn new(dev_id: u32, offset: u64) -> Self {
    Self { dev_id, offset }
  }
}

impl fmt::Display for DeviceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.dev_id, self.offset)
  }
}

/// Shared-ownership handle to a log payload.
///
/// The handle is cheaply clonable; the payload lives as long as its longest
/// holder (tracker slot, user callback, or the device).
#[derive(Clone, PartialEq, Eq)]
pub struct LogBuffer {
  data: Arc<[u8]>,
}

impl LogBuffer {
  pub fn from_slice(data: &[u8]) -> Self {
    Self { data: Arc::from(data) }
  }

  pub fn empty() -> Self {
    Self { data: Arc::from(&[][..]) }
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl From<Vec<u8>> for LogBuffer {
  fn from(data: Vec<u8>) -> Self {
    Self { data: Arc::from(data) }
  }
}

impl AsRef<[u8]> for LogBuffer {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl fmt::Debug for LogBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "LogBuffer({} bytes)", self.data.len())
  }
}

/// Opaque per-request context, handed back in the completion callback.
pub type Cookie = Box<dyn Any + Send>;

/// Per-request write completion callback.
pub type LogWriteCompCb = Box<dyn FnOnce(Lsn, Result<DeviceKey>, Option<Cookie>) + Send>;

/// Default write completion callback, used when a request carries none.
pub type LogReqCompCb = Arc<dyn Fn(Lsn, Result<DeviceKey>, Option<Cookie>) + Send + Sync>;

/// Per-request read completion callback.
pub type LogReadCb = Box<dyn FnOnce(Lsn, Result<LogBuffer>, Option<Cookie>) + Send>;

/// Device-level read completion callback.
pub type ReadCompCb = Box<dyn FnOnce(Result<LogBuffer>) + Send>;

/// Callback for every log entry re-delivered during recovery.
pub type LogFoundCb = Arc<dyn Fn(Lsn, LogBuffer) + Send + Sync>;

/// Callback fired once the device has replayed every surviving entry.
pub type ReplayDoneCb = Arc<dyn Fn() + Send + Sync>;

/// Callback fired when a rollback marker has become durable.
pub type RollbackDoneCb = Box<dyn FnOnce(Lsn) + Send>;
