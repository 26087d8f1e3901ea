//! MemTable Module
//!
//! In-memory buffer for writes that have not yet been flushed to a segment.
//!
//! ## Responsibilities
//! - Fast exact-match reads and writes in memory
//! - Track accounted size against the flush threshold
//! - Ordered iteration for segment creation
//!
//! ## Data Structure Choice
//! A plain `BTreeMap`: keys stay sorted for deterministic flush ordering.
//! The table has no lock of its own; the owning [`Shard`](crate::Shard)
//! guards it together with the WAL and the segment set.

mod table;

pub use table::{MemTable, MemTableError, ENTRY_OVERHEAD};

/// Accounted cost of one key/value pair.
///
/// Shared by the memtable and the compactor's output pool so both cut
/// segments at the same sizes.
pub fn entry_cost(key: &str, value: &str) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}
