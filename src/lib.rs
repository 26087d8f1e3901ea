//! # shardkv
//!
//! An embedded, sharded key-value store built on a log-structured merge design:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with partial write handling
//! - Compressed, sparse-indexed immutable segments
//! - Background compaction that keeps only the newest value per key
//! - Hash partitioning across independent shards
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Router                               │
//! │                 (crc32(key) % shard_count)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Shard                                │
//! │            (RwLock state, background compactor)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │ (BTreeMap)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  Segments   │◄──── Merger
//!                           │ (gzip pages)│
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod shard;
pub mod router;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::{Config, WalSyncStrategy};
pub use router::Router;
pub use shard::{Shard, ShardStats};
pub use storage::Storage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
