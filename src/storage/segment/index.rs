//! Sparse index and its recovery journal.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::Path;

use super::{escape, unescape, KV_SEPARATOR};
use crate::error::{KvError, Result};

/// Byte range `[start, end)` of one compressed page in the payload file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u64,
    pub end: u64,
}

impl PageRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// First key of each page → that page's byte range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    pages: BTreeMap<String, PageRange>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, first_key: String, range: PageRange) {
        self.pages.insert(first_key, range);
    }

    /// The page that would hold `key`: among pages whose first key is
    /// `<= key`, the one starting furthest into the file.
    ///
    /// `None` means the key sorts before every page and cannot be in the
    /// segment. `Some` is only a candidate; the page may still miss.
    pub fn lookup(&self, key: &str) -> Option<PageRange> {
        // Pages are laid out in key order, so the greatest first key <= key
        // is also the greatest start offset.
        self.pages
            .range::<str, _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, range)| *range)
    }

    /// All pages in file order
    pub fn pages(&self) -> Vec<PageRange> {
        let mut ranges: Vec<PageRange> = self.pages.values().copied().collect();
        ranges.sort_by_key(|r| r.start);
        ranges
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn first_key(&self) -> Option<&str> {
        self.pages.keys().next().map(String::as_str)
    }

    /// Write the journal: one `first_key:start:end` line per page
    pub fn write_journal(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let mut line = String::new();
        for (key, range) in &self.pages {
            line.clear();
            escape(key, &mut line);
            writeln!(writer, "{}:{}:{}", line, range.start, range.end)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rebuild an index from its journal without touching the payload
    pub fn read_journal(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut index = Self::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let corrupt = |reason: String| KvError::CorruptIndex {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", number + 1, reason),
            };

            // The key is escaped, so the last two colons are the separators
            let mut fields = line.rsplitn(3, KV_SEPARATOR);
            let end = fields.next();
            let start = fields.next();
            let key = fields.next();
            let (key, start, end) = match (key, start, end) {
                (Some(k), Some(s), Some(e)) => (k, s, e),
                _ => return Err(corrupt(format!("expected key:start:end, got {:?}", line))),
            };

            let start: u64 = start
                .parse()
                .map_err(|e| corrupt(format!("bad start offset {:?}: {}", start, e)))?;
            let end: u64 = end
                .parse()
                .map_err(|e| corrupt(format!("bad end offset {:?}: {}", end, e)))?;
            if end < start {
                return Err(corrupt(format!("end {} before start {}", end, start)));
            }
            let key = unescape(key).ok_or_else(|| corrupt(format!("bad key escape {:?}", key)))?;

            index.insert(key, PageRange { start, end });
        }

        Ok(index)
    }
}

/// Write `index` to `tmp` and atomically move it to `path`
pub(crate) fn publish_journal(index: &SparseIndex, tmp: &Path, path: &Path) -> Result<()> {
    index.write_journal(tmp)?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(pages: &[(&str, u64, u64)]) -> SparseIndex {
        let mut index = SparseIndex::new();
        for (key, start, end) in pages {
            index.insert(
                key.to_string(),
                PageRange {
                    start: *start,
                    end: *end,
                },
            );
        }
        index
    }

    #[test]
    fn test_lookup_picks_covering_page() {
        let index = index_of(&[("a", 0, 10), ("m", 10, 25), ("t", 25, 31)]);

        assert_eq!(index.lookup("a").unwrap().start, 0);
        assert_eq!(index.lookup("c").unwrap().start, 0);
        assert_eq!(index.lookup("m").unwrap().start, 10);
        assert_eq!(index.lookup("s").unwrap().start, 10);
        assert_eq!(index.lookup("zzz").unwrap().start, 25);
    }

    #[test]
    fn test_lookup_before_first_page() {
        let index = index_of(&[("b", 0, 10)]);
        assert_eq!(index.lookup("a"), None);
        assert_eq!(SparseIndex::new().lookup("a"), None);
    }

    #[test]
    fn test_journal_roundtrip_with_colon_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("j.idx");
        let index = index_of(&[("user:1", 0, 40), ("user:9;x", 40, 77)]);

        index.write_journal(&path).unwrap();
        let restored = SparseIndex::read_journal(&path).unwrap();

        assert_eq!(restored, index);
    }

    #[test]
    fn test_corrupt_journal_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("j.idx");
        fs::write(&path, "a:0:10\nb:ten:20\n").unwrap();

        let err = SparseIndex::read_journal(&path).unwrap_err();
        assert!(matches!(err, KvError::CorruptIndex { .. }), "{err}");
    }
}
