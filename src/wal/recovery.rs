//! WAL Recovery
//!
//! Handles crash recovery by replaying WAL files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{WalEntry, WalReader};
use crate::error::{KvError, Result};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether a torn or corrupt tail was dropped
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries in order
    /// 2. Stop at the first torn or corrupted entry (nothing after it can be
    ///    trusted to be framed correctly)
    /// 3. Return the valid prefix
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(KvError::WalCorruption(reason)) | Err(KvError::Serialization(reason)) => {
                    warn!(
                        path = %path.display(),
                        offset = reader.position(),
                        %reason,
                        "dropping corrupt WAL tail"
                    );
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without keeping the entries
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::recover(path).map(|(_, result)| result)
    }
}

/// WAL files in `dir`, oldest first (names are zero-padded timestamps).
///
/// Anything not named by digits alone, such as a set-aside `*.corrupt` file,
/// is skipped.
pub fn list_wal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_wal_name(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_wal_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
