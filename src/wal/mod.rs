//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for writes that live only in the memtable.
//!
//! ## Responsibilities
//! - Append one record per mutation absorbed by the memtable
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery and replay
//!
//! A shard keeps at most one live WAL file at a time, named by the creation
//! timestamp, under `<shard-dir>/WAL/`. A flush rotates to a new file and
//! deletes the old one once its memtable is stored in a segment. Files that
//! cannot be replayed on startup are renamed to `<name>.corrupt` and ignored.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is the bincode encoding of a [`WalEntry`]; the CRC covers `Data`.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{WalEntry, HEADER_SIZE};
pub use reader::{WalIterator, WalReader};
pub use recovery::{list_wal_files, RecoveryResult, WalRecovery};
pub use writer::WalWriter;
