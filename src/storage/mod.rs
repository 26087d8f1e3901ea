//! Storage Module
//!
//! Persistent storage layer: compressed, sparse-indexed segments, the
//! per-shard segment store, and the compactor that merges segments.
//!
//! Also defines [`Storage`], the `get`/`set` capability every backend offers
//! to the outer service layer. [`Shard`](crate::Shard) and
//! [`Router`](crate::Router) implement it; an external cache-backed backend
//! can implement it too and be swapped in without touching callers.

mod manager;
mod merger;
pub mod segment;

pub use manager::{SegmentSet, SegmentStore};
pub use merger::Merger;
pub use segment::{PageRange, Segment, SegmentId, SparseIndex};

use crate::error::Result;

/// Key-value capability exposed to the service layer.
///
/// Implementations must be safe to call from many threads at once.
pub trait Storage: Send + Sync {
    /// Value for `key`, or [`KvError::NotFound`](crate::KvError::NotFound)
    fn get(&self, key: &str) -> Result<String>;

    /// Durably record `key = value`
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}
