//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing within one file
    pub lsn: u64,

    pub key: String,

    pub value: String,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

impl WalEntry {
    pub fn new(lsn: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            lsn,
            key: key.into(),
            value: value.into(),
            timestamp: unix_millis(),
        }
    }

    /// Encode header + payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            KvError::Serialization(format!("WAL entry of {} bytes is too large", payload.len()))
        })?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a payload whose header has already been read, checking the CRC
    /// and that the LSN in the header agrees with the payload.
    pub fn deserialize(header_lsn: u64, expected_crc: u32, payload: &[u8]) -> Result<Self> {
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            return Err(KvError::WalCorruption(format!(
                "CRC mismatch at lsn {}: expected {:#010x}, got {:#010x}",
                header_lsn, expected_crc, actual_crc
            )));
        }

        let entry: WalEntry = bincode::deserialize(payload)?;
        if entry.lsn != header_lsn {
            return Err(KvError::WalCorruption(format!(
                "LSN mismatch: header {} vs payload {}",
                header_lsn, entry.lsn
            )));
        }
        Ok(entry)
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
