//! Binary format of the records a log store hands to the shared device.
//!
//! Every append becomes exactly one framed, CRC-protected record. The device
//! owns placement and batching; this module only defines the bytes.
//!
//! ## Binary Format
//!
//! ```text
//! MAGIC        4 bytes   "PLXR"
//! CRC32        4 bytes   Checksum of everything after this field
//! STORE_ID     4 bytes   Owning log store (u32 LE)
//! LSN          8 bytes   Sequence number (i64 LE)
//! KIND         1 byte    Data / Gap / Rollback
//! PAYLOAD_LEN  4 bytes   Length of PAYLOAD (u32 LE)
//! RESERVED     3 bytes   Zero padding
//! PAYLOAD      N bytes   Caller data; empty for Gap and Rollback
//! ```

use crate::error::{Error, Result};
use crate::types::{Lsn, StoreId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{Read, Write};

pub const RECORD_MAGIC: u32 = 0x5258_4C50; // "PLXR"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
  /// A regular log entry with a caller payload.
  Data = 0x00,
  /// A durable gap marker: the sequence number is consumed but unreadable.
  Gap = 0x01,
  /// An out-of-band marker recording that the tail after `lsn` was erased.
  Rollback = 0x02,
}

impl TryFrom<u8> for RecordKind {
  type Error = Error;
  fn try_from(v: u8) -> Result<Self> {
    match v {
      0x00 => Ok(RecordKind::Data),
      0x01 => Ok(RecordKind::Gap),
      0x02 => Ok(RecordKind::Rollback),
      _ => Err(Error::Corruption(format!("Unknown record kind: {}", v))),
    }
  }
}

/// The fixed-size record header (28 bytes on device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
  pub crc: u32,
  pub store_id: StoreId,
  pub lsn: Lsn,
  pub kind: RecordKind,
  pub payload_len: u32,
}

impl RecordHeader {
  pub const SIZE: usize = 4 + 4 + 4 + 8 + 1 + 4 + 3; // 28 bytes

  pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
    writer.write_u32::<LittleEndian>(RECORD_MAGIC)?;
    writer.write_u32::<LittleEndian>(self.crc)?;
    writer.write_u32::<LittleEndian>(self.store_id)?;
    writer.write_i64::<LittleEndian>(self.lsn)?;
    writer.write_u8(self.kind as u8)?;
    writer.write_u32::<LittleEndian>(self.payload_len)?;
    writer.write_all(&[0u8; 3])?; // Padding
    Ok(())
  }

  pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != RECORD_MAGIC {
      return Err(Error::Corruption(format!("Invalid record magic: {:#x}", magic)));
    }

    let crc = reader.read_u32::<LittleEndian>()?;
    let store_id = reader.read_u32::<LittleEndian>()?;
    let lsn = reader.read_i64::<LittleEndian>()?;
    let kind = RecordKind::try_from(reader.read_u8()?)?;
    let payload_len = reader.read_u32::<LittleEndian>()?;

    let mut pad = [0u8; 3];
    reader.read_exact(&mut pad)?;

    Ok(Self {
      crc,
      store_id,
      lsn,
      kind,
      payload_len,
    })
  }
}

/// Serializes one record with framing.
pub fn encode_record(store_id: StoreId, lsn: Lsn, kind: RecordKind, payload: &[u8]) -> Result<Vec<u8>> {
  let header = RecordHeader {
    crc: checksum(store_id, lsn, kind, payload),
    store_id,
    lsn,
    kind,
    payload_len: payload.len() as u32,
  };

  let mut buf = Vec::with_capacity(RecordHeader::SIZE + payload.len());
  header.write(&mut buf)?;
  buf.write_all(payload)?;
  Ok(buf)
}

/// Reads one record, validating magic and checksum.
pub fn decode_record<R: Read>(reader: &mut R) -> Result<(RecordHeader, Vec<u8>)> {
  let header = RecordHeader::read(reader)?;

  let mut payload = vec![0u8; header.payload_len as usize];
  reader.read_exact(&mut payload)?;

  let actual = checksum(header.store_id, header.lsn, header.kind, &payload);
  if actual != header.crc {
    return Err(Error::CrcMismatch {
      expected: header.crc,
      actual,
    });
  }

  Ok((header, payload))
}

/// CRC32 over the record content (everything after the CRC field).
pub fn checksum(store_id: StoreId, lsn: Lsn, kind: RecordKind, payload: &[u8]) -> u32 {
  let mut hasher = Hasher::new();
  hasher.update(&store_id.to_le_bytes());
  hasher.update(&lsn.to_le_bytes());
  hasher.update(&[kind as u8]);
  hasher.update(&(payload.len() as u32).to_le_bytes());
  hasher.update(payload);
  hasher.finalize()
}
