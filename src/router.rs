//! Router
//!
//! Partitions keys across a fixed number of independent shards. The shard for
//! a key is `crc32(key) % shard_count`, so the mapping is stable across
//! restarts as long as the shard count does not change.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::{KvError, Result};
use crate::shard::{Shard, ShardStats};
use crate::storage::Storage;

/// Fixed set of shards addressed by key hash
pub struct Router {
    shards: Vec<Shard>,
    data_dir: PathBuf,
}

impl Router {
    /// Open `config.shard_count` shards under `config.data_dir/shard-{i}`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let shards = (0..config.shard_count)
            .map(|i| Shard::open(shard_dir(&config.data_dir, i), &config))
            .collect::<Result<Vec<_>>>()?;

        info!(
            data_dir = %config.data_dir.display(),
            shards = shards.len(),
            "router opened"
        );

        Ok(Self {
            shards,
            data_dir: config.data_dir,
        })
    }

    /// Index of the shard owning `key`
    pub fn route(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.shards.len()
    }

    pub fn get(&self, key: &str) -> Result<String> {
        self.shards[self.route(key)].get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.shards[self.route(key)].set(key, value)
    }

    /// Shard `index`, if it exists
    pub fn shard(&self, index: usize) -> Result<&Shard> {
        self.shards.get(index).ok_or_else(|| {
            KvError::InvalidArgument(format!(
                "shard {} out of range (have {})",
                index,
                self.shards.len()
            ))
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Flush every shard's memtable
    pub fn flush_all(&self) -> Result<()> {
        self.shards.iter().try_for_each(Shard::flush)
    }

    /// Run one compaction pass on every shard; returns how many compacted
    pub fn compact_all(&self) -> Result<usize> {
        let mut compacted = 0;
        for shard in &self.shards {
            if shard.compact()? {
                compacted += 1;
            }
        }
        Ok(compacted)
    }

    /// Per-shard counters, in shard order
    pub fn stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(Shard::stats).collect()
    }

    /// Close every shard, reporting the first failure
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for shard in &self.shards {
            if let Err(e) = shard.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Storage for Router {
    fn get(&self, key: &str) -> Result<String> {
        Router::get(self, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Router::set(self, key, value)
    }
}

/// `{data_dir}/shard-{index}`
pub fn shard_dir(data_dir: &Path, index: usize) -> PathBuf {
    data_dir.join(format!("shard-{}", index))
}
