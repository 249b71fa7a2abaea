//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CellarError, Result};
use crate::heap::DurableObject;

/// Size of the fixed entry header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to replay
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// A committed heap transaction: after-images of every object it touched
    Commit {
        /// Allocation cursor after the transaction
        next_offset: u64,

        /// Heap root after the transaction
        root: u64,

        writes: Vec<HeapWrite>,
    },
}

/// One object-level effect of a committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeapWrite {
    /// Object written (allocated or modified); carries the full after-image
    Put { offset: u64, object: DurableObject },

    /// Object freed
    Free { offset: u64 },
}

impl WalEntry {
    /// Create a new entry stamped with the current time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Encode as `[LSN][CRC][Len][Data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(&(&self.operation, self.timestamp))?;
        if data.len() > u32::MAX as usize {
            return Err(CellarError::WalWrite(format!(
                "entry payload too large: {} bytes",
                data.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
        buf.put_u64_le(self.lsn);
        buf.put_u32_le(Self::compute_crc(&data));
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(&data);

        Ok(buf.to_vec())
    }

    /// Decode a full frame, validating length and checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CellarError::WalCorruption(format!(
                "frame shorter than header: {} bytes",
                bytes.len()
            )));
        }

        let (lsn, crc, len) = Self::parse_header(&bytes[..HEADER_SIZE]);
        let data = bytes
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or_else(|| {
                CellarError::WalCorruption(format!(
                    "truncated payload at LSN {}: expected {} bytes",
                    lsn, len
                ))
            })?;

        Self::decode_payload(lsn, crc, data)
    }

    /// Split a header into (lsn, crc, payload length)
    pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, usize) {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);
        (
            u64::from_le_bytes(lsn),
            u32::from_le_bytes(crc),
            u32::from_le_bytes(len) as usize,
        )
    }

    /// Verify the checksum and decode the payload
    pub(crate) fn decode_payload(lsn: u64, crc: u32, data: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(data);
        if actual != crc {
            return Err(CellarError::WalCorruption(format!(
                "CRC mismatch at LSN {}: stored {:#010x}, computed {:#010x}",
                lsn, crc, actual
            )));
        }

        let (operation, timestamp): (Operation, u64) = bincode::deserialize(data)
            .map_err(|e| CellarError::WalCorruption(format!("undecodable payload at LSN {}: {}", lsn, e)))?;

        Ok(Self {
            lsn,
            operation,
            timestamp,
        })
    }

    /// CRC32 of an encoded payload
    pub fn compute_crc(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}
