use crate::error::{Error, Result};
use crate::types::{Lsn, INVALID_LSN};

#[derive(Debug, Clone)]
pub struct LogStoreOptions {
  /// When true, the store only accepts `append_*` writes; writes at an
  /// explicit sequence number are rejected.
  /// Default: false.
  pub append_mode: bool,

  /// First sequence number the store anchors at after fresh creation.
  /// Default: 0.
  pub start_lsn: Lsn,

  /// Initial capacity of the tracker window. The window grows as needed;
  /// this only sizes the first allocation.
  /// Default: 256.
  pub tracker_window_hint: usize,
}

impl Default for LogStoreOptions {
  fn default() -> Self {
    Self {
      append_mode: false,
      start_lsn: 0,
      tracker_window_hint: 256,
    }
  }
}

impl LogStoreOptions {
  pub fn new(start_lsn: Lsn) -> Self {
    Self {
      start_lsn,
      ..Default::default()
    }
  }

  pub fn append_only(start_lsn: Lsn) -> Self {
    Self {
      append_mode: true,
      start_lsn,
      ..Default::default()
    }
  }

  pub(crate) fn validate(&self) -> Result<()> {
    if self.start_lsn == INVALID_LSN {
      return Err(Error::Config("start_lsn must be a valid sequence number".into()));
    }
    if self.start_lsn == Lsn::MIN + 1 {
      // The cursors anchor at start_lsn - 1, which must not underflow.
      return Err(Error::Config("start_lsn is too small".into()));
    }
    Ok(())
  }
}
