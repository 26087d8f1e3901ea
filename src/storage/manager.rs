//! Segment Store
//!
//! Owns one shard's segment directory and the segment-set snapshots.
//!
//! ## Responsibilities
//! - Discover and restore existing segments on startup
//! - Search segments newest → oldest for reads
//! - Create new segments from memtable flushes and compaction output
//! - Hand out segment ids that preserve creation order

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::segment::{Segment, SegmentId, JOURNAL_DIR, JOURNAL_EXT, PAYLOAD_EXT, TMP_EXT};
use crate::error::Result;
use crate::memtable::MemTable;

/// Immutable snapshot of a shard's segments, oldest first.
///
/// A shard swaps whole `Arc<SegmentSet>` values; readers clone the `Arc` and
/// search without holding the shard lock.
#[derive(Debug, Default, Clone)]
pub struct SegmentSet {
    segments: Vec<Arc<Segment>>,
}

impl SegmentSet {
    pub fn new(segments: Vec<Arc<Segment>>) -> Self {
        Self { segments }
    }

    /// Search newest → oldest, first hit wins
    pub fn find(&self, key: &str) -> Result<Option<String>> {
        for segment in self.segments.iter().rev() {
            if let Some(value) = segment.find(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// New set with `segment` appended as the newest
    pub fn with_appended(&self, segment: Arc<Segment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Whether `other`'s segments are the oldest segments of `self`, in order
    pub fn starts_with(&self, other: &SegmentSet) -> bool {
        other.segments.len() <= self.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Manages the segment directory of one shard
#[derive(Debug)]
pub struct SegmentStore {
    /// Directory holding payload files (`journal/` lives inside it)
    dir: PathBuf,

    /// Max uncompressed page length
    segment_length: usize,

    /// Next `seq` for a flushed segment (atomic, lock-free)
    next_seq: AtomicU64,
}

impl SegmentStore {
    /// Open or create the store and restore every complete segment.
    ///
    /// On startup:
    /// 1. Create `dir` and `dir/journal`
    /// 2. Remove half-written files (`*.tmp`, payloads without a journal)
    /// 3. Restore each journal; unreadable ones are logged and skipped
    /// 4. Order by id (creation order)
    pub fn open(dir: &Path, segment_length: usize) -> Result<(Self, SegmentSet)> {
        let journal_dir = dir.join(JOURNAL_DIR);
        fs::create_dir_all(&journal_dir)?;

        let mut restored: Vec<Segment> = Vec::new();
        for entry in fs::read_dir(&journal_dir)? {
            let path = entry?.path();
            if has_extension(&path, TMP_EXT) {
                remove_leftover(&path);
                continue;
            }
            if !has_extension(&path, JOURNAL_EXT) {
                continue;
            }
            let id = match parse_id(&path) {
                Some(id) => id,
                None => {
                    warn!(path = %path.display(), "ignoring journal with unrecognised name");
                    continue;
                }
            };

            let data_path = payload_path(dir, id);
            match Segment::restore(&data_path, &path, id) {
                Ok(segment) => restored.push(segment),
                Err(e) => warn!(
                    segment = %id,
                    error = %e,
                    "skipping segment that failed to restore"
                ),
            }
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if has_extension(&path, TMP_EXT) {
                remove_leftover(&path);
            } else if has_extension(&path, PAYLOAD_EXT) {
                let complete = parse_id(&path)
                    .map(|id| journal_dir.join(format!("{}.{}", id, JOURNAL_EXT)).exists())
                    .unwrap_or(false);
                if !complete {
                    remove_leftover(&path);
                }
            }
        }

        restored.sort_by_key(|s| s.id());
        let next_seq = restored.iter().map(|s| s.id().seq).max().map_or(1, |s| s + 1);

        if !restored.is_empty() {
            info!(
                dir = %dir.display(),
                segments = restored.len(),
                "segments restored"
            );
        }

        let store = Self {
            dir: dir.to_path_buf(),
            segment_length,
            next_seq: AtomicU64::new(next_seq),
        };
        let set = SegmentSet::new(restored.into_iter().map(Arc::new).collect());
        Ok((store, set))
    }

    /// Flush a memtable to a new segment
    pub fn flush(&self, memtable: &MemTable) -> Result<Arc<Segment>> {
        let id = SegmentId::flushed(self.next_seq.fetch_add(1, Ordering::SeqCst));
        let segment = self.build(id, memtable.iter())?;
        Ok(Arc::new(segment))
    }

    /// Build a segment with a caller-chosen id
    pub fn build<I, K, V>(&self, id: SegmentId, entries: I) -> Result<Segment>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Segment::build_from_sorted(&self.dir, id, entries, self.segment_length)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    /// Get the next flush `seq` (for testing/debugging)
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn payload_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{}.{}", id, PAYLOAD_EXT))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map_or(false, |e| e == ext)
}

/// "00000000000000000042-00000-00000.gz" → SegmentId
fn parse_id(path: &Path) -> Option<SegmentId> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn remove_leftover(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "removed incomplete segment file"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove incomplete segment file"),
    }
}
