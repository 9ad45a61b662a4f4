use std::io;
use thiserror::Error;

use crate::types::{Lsn, StoreId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Lsn {lsn} is at or below the truncation point {truncated_upto}")]
  LsnTruncated { lsn: Lsn, truncated_upto: Lsn },

  #[error("Lsn {0} already holds a record")]
  DuplicateLsn(Lsn),

  #[error("Lsn {0} was gap-filled and carries no payload")]
  Gap(Lsn),

  #[error("No record at Lsn {0}")]
  NotFound(Lsn),

  #[error("In-flight writes in range [{from}..={to}]")]
  PendingIo { from: Lsn, to: Lsn },

  #[error("Device Error: {0}")]
  Device(String),

  #[error("Log store is closed")]
  Closed,

  #[error("Data Corruption: {0}")]
  Corruption(String),

  #[error("CRC32 Checksum Mismatch: expected {expected:#x}, got {actual:#x}")]
  CrcMismatch { expected: u32, actual: u32 },

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Store {0} is already registered")]
  DuplicateStore(StoreId),

  #[error("Store {0} is not registered")]
  UnknownStore(StoreId),
}
