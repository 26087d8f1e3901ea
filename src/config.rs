//! Configuration for shardkv
//!
//! Centralized configuration with sensible defaults. Every value is read once
//! when a [`Router`](crate::Router) or [`Shard`](crate::Shard) is opened and is
//! immutable afterwards.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Main configuration for a shardkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {data_dir}/
    ///     └── shard-{n}/
    ///           ├── WAL/{timestamp}
    ///           └── segments/
    ///                 ├── {id}.gz
    ///                 └── journal/{id}.idx
    pub data_dir: PathBuf,

    /// Number of independent shards keys are partitioned across
    pub shard_count: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max accounted size of a memtable before it is flushed (in bytes).
    /// Also bounds the size of each segment written by compaction.
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Max uncompressed length of one segment page (in bytes)
    pub segment_length: usize,

    /// How often the background compactor wakes up
    pub compaction_interval: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./shardkv_data"),
            shard_count: 1,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            segment_length: 4 * 1024,             // 4 KB pages
            compaction_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(KvError::Config("shard_count must be >= 1".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(KvError::Config("memtable_size_limit must be > 0".into()));
        }
        if self.segment_length == 0 {
            return Err(KvError::Config("segment_length must be > 0".into()));
        }
        if self.compaction_interval.is_zero() {
            return Err(KvError::Config("compaction_interval must be > 0".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(KvError::Config(
                "EveryNEntries sync strategy needs count >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of shards
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the segment page length (in bytes)
    pub fn segment_length(mut self, length: usize) -> Self {
        self.config.segment_length = length;
        self
    }

    /// Set the background compaction period
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
