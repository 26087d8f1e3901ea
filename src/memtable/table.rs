//! MemTable implementation
//!
//! BTreeMap-based memtable with size accounting.

use std::collections::btree_map;
use std::collections::BTreeMap;

use thiserror::Error;

use super::entry_cost;

/// Fixed per-entry bookkeeping charge added to `len(key) + len(value)`
pub const ENTRY_OVERHEAD: usize = 8;

/// Signals raised by [`MemTable::add`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemTableError {
    /// Admitting the entry would push the table past its cap.
    /// The entry was NOT inserted.
    #[error("MemTable size exceeded: {current} + {needed} > {max}")]
    SizeExceeded {
        current: usize,
        needed: usize,
        max: usize,
    },
}

/// In-memory sorted table for recent writes
#[derive(Debug)]
pub struct MemTable {
    data: BTreeMap<String, String>,
    current_size: usize,
    max_size: usize,
}

impl MemTable {
    /// Create a new empty MemTable with the given cap (in bytes)
    pub fn new(max_size: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            current_size: 0,
            max_size,
        }
    }

    /// Exact lookup
    pub fn find(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Add or replace a key.
    ///
    /// Replacing an existing key never changes the accounted size. A new key
    /// is admitted only if it fits under the cap; an empty table always
    /// admits, so an oversized single entry cannot wedge the caller.
    pub fn add(&mut self, key: String, value: String) -> Result<(), MemTableError> {
        if let Some(existing) = self.data.get_mut(&key) {
            if *existing != value {
                *existing = value;
            }
            return Ok(());
        }

        let needed = entry_cost(&key, &value);
        if !self.data.is_empty() && self.current_size + needed > self.max_size {
            return Err(MemTableError::SizeExceeded {
                current: self.current_size,
                needed,
                max: self.max_size,
            });
        }

        self.current_size += needed;
        self.data.insert(key, value);
        Ok(())
    }

    /// Recovery-time insert: same accounting as [`add`](Self::add), no cap.
    ///
    /// Later calls for the same key win.
    pub fn replay(&mut self, key: String, value: String) {
        match self.data.entry(key) {
            btree_map::Entry::Occupied(mut slot) => {
                slot.insert(value);
            }
            btree_map::Entry::Vacant(slot) => {
                self.current_size += entry_cost(slot.key(), &value);
                slot.insert(value);
            }
        }
    }

    /// Put back what `key` held before an [`add`](Self::add) whose durable
    /// record could not be written.
    pub fn undo_add(&mut self, key: &str, previous: Option<String>) {
        match previous {
            Some(value) => {
                if let Some(slot) = self.data.get_mut(key) {
                    *slot = value;
                }
            }
            None => {
                if let Some(value) = self.data.remove(key) {
                    self.current_size -= entry_cost(key, &value);
                }
            }
        }
    }

    /// Empty the table after a successful flush
    pub fn clear(&mut self) {
        self.data.clear();
        self.current_size = 0;
    }

    /// Accounted size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether the accounted size is already past the cap
    pub fn is_over_capacity(&self) -> bool {
        self.current_size > self.max_size
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_does_not_recharge_size() {
        let mut table = MemTable::new(1024);
        table.add("k".into(), "v".into()).unwrap();
        let size = table.size();

        table.add("k".into(), "a much longer value".into()).unwrap();

        assert_eq!(table.size(), size);
        assert_eq!(table.find("k"), Some("a much longer value"));
    }

    #[test]
    fn test_rejected_entry_is_not_inserted() {
        // Each single-char pair costs 10 bytes
        let mut table = MemTable::new(20);
        table.add("a".into(), "1".into()).unwrap();
        table.add("b".into(), "2".into()).unwrap();

        let err = table.add("c".into(), "3".into()).unwrap_err();

        assert_eq!(
            err,
            MemTableError::SizeExceeded {
                current: 20,
                needed: 10,
                max: 20
            }
        );
        assert_eq!(table.find("c"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_oversized_entry_admitted_into_empty_table() {
        let mut table = MemTable::new(4);
        table.add("key".into(), "value".into()).unwrap();
        assert!(table.is_over_capacity());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_undo_add_restores_previous_state() {
        let mut table = MemTable::new(1024);
        table.add("k".into(), "old".into()).unwrap();
        let size = table.size();

        table.add("k".into(), "new".into()).unwrap();
        table.undo_add("k", Some("old".into()));
        assert_eq!(table.find("k"), Some("old"));
        assert_eq!(table.size(), size);

        table.add("fresh".into(), "v".into()).unwrap();
        table.undo_add("fresh", None);
        assert_eq!(table.find("fresh"), None);
        assert_eq!(table.size(), size);
    }

    #[test]
    fn test_replay_last_write_wins() {
        let mut table = MemTable::new(1);
        table.replay("k".into(), "1".into());
        table.replay("k".into(), "2".into());
        table.replay("j".into(), "3".into());

        assert_eq!(table.find("k"), Some("2"));
        assert_eq!(table.size(), 2 * entry_cost("k", "1"));
    }
}
