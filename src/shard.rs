//! Shard Module
//!
//! One independent instance of the full engine: memtable, WAL, segment set
//! and background compactor.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and segments
//! - Handle concurrent read/write access
//! - Flush the memtable when the next write would overflow it
//! - Run compaction on a timer
//! - Rebuild state from WAL files and segment journals on startup

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{KvError, Result};
use crate::memtable::{MemTable, MemTableError};
use crate::storage::segment::check_fits;
use crate::storage::{Merger, Segment, SegmentSet, SegmentStore, Storage};
use crate::wal::{list_wal_files, WalRecovery, WalWriter};

/// Fewest segments worth merging
const MIN_SEGMENTS_TO_COMPACT: usize = 2;

/// Suffix given to WAL files that could not be replayed
const UNREADABLE_WAL_SUFFIX: &str = "corrupt";

/// A single storage shard
///
/// ## Concurrency Model
///
/// One `RwLock` guards the memtable, the WAL writer, the current segment set
/// and the dirty mark together:
///
/// - **Writes** (`set`) take the write lock for the memtable update and the
///   WAL append.
/// - **Flushes** freeze the memtable under the write lock, build the segment
///   with the lock released, then take it again to publish the segment. The
///   frozen table stays readable until then. One flush runs at a time.
/// - **Reads** (`get`) take the read lock only to check the memtables and
///   clone the `Arc<SegmentSet>`, then search segments without the lock.
/// - **Compaction** snapshots the set under the read lock, merges with no lock
///   held, and swaps the result in under the write lock after checking that
///   the snapshot is still the oldest part of the current set. Segments
///   flushed meanwhile stay in place after the merged output.
pub struct Shard {
    inner: Arc<ShardInner>,

    /// Background compaction thread, taken on close
    compactor: Mutex<Option<CompactorHandle>>,
}

struct CompactorHandle {
    /// Dropping the sender tells the thread to exit
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

struct ShardInner {
    dir: PathBuf,

    store: SegmentStore,

    state: RwLock<ShardState>,

    /// Serializes flushes
    flush_lock: Mutex<()>,

    /// Serializes compaction passes (timer and explicit calls)
    merge_lock: Mutex<()>,

    /// Size bound of each segment written by compaction
    mem_new_file_limit: usize,

    closed: AtomicBool,
}

struct ShardState {
    memtable: MemTable,

    /// Memtable being written out by a flush; read after `memtable`
    frozen: Option<Arc<MemTable>>,

    wal: WalWriter,

    /// WAL files whose entries went back into `memtable` after a failed flush
    unflushed_wals: Vec<PathBuf>,

    segments: Arc<SegmentSet>,

    /// Segments were added since the last compaction
    dirty: bool,
}

/// Point-in-time counters for one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    pub segment_count: usize,
    pub dirty: bool,
}

impl Shard {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    pub const WAL_DIR: &'static str = "WAL";
    pub const SEGMENT_DIR: &'static str = "segments";

    /// Open or create a shard rooted at `dir`
    ///
    /// On startup:
    /// 1. Restore segments from their journals
    /// 2. Replay every readable WAL file into a fresh memtable
    /// 3. Re-log the recovered memtable to one new WAL, then delete the
    ///    replayed files
    /// 4. Flush if the recovered memtable is over the cap
    /// 5. Start the background compactor
    pub fn open(dir: impl AsRef<Path>, config: &Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();

        let inner = Arc::new(ShardInner::recover(dir, config)?);
        let compactor = spawn_compactor(Arc::clone(&inner), config.compaction_interval)?;

        Ok(Self {
            inner,
            compactor: Mutex::new(Some(compactor)),
        })
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. Frozen MemTable (flush in progress)
    /// 3. Segments (newest to oldest)
    pub fn get(&self, key: &str) -> Result<String> {
        self.inner.check_open()?;

        let segments = {
            let state = self.inner.state.read();
            if let Some(value) = state.memtable.find(key) {
                return Ok(value.to_owned());
            }
            if let Some(value) = state.frozen.as_ref().and_then(|f| f.find(key)) {
                return Ok(value.to_owned());
            }
            Arc::clone(&state.segments)
        };

        segments.find(key)?.ok_or(KvError::NotFound)
    }

    /// Set a key-value pair
    ///
    /// Steps:
    /// 1. Reject pairs that cannot fit in one segment page
    /// 2. Acquire write lock and offer the pair to the memtable
    /// 3. If it would overflow: release the lock, flush, and retry
    /// 4. Append the pair to the WAL; on failure undo step 2 and report it
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.check_open()?;
        check_fits(key, value, self.inner.store.segment_length())?;

        loop {
            let mut guard = self.inner.state.write();
            let state = &mut *guard;

            let previous = state.memtable.find(key).map(str::to_owned);
            match state.memtable.add(key.to_owned(), value.to_owned()) {
                Ok(()) => {}
                Err(MemTableError::SizeExceeded { .. }) => {
                    drop(guard);
                    self.inner.flush()?;
                    continue;
                }
            }

            if let Err(e) = state.wal.append(key, value) {
                error!(key, error = %e, "WAL append failed, write rejected");
                state.memtable.undo_add(key, previous);
                return Err(e);
            }
            return Ok(());
        }
    }

    /// Flush the memtable to a segment regardless of its size
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.flush()?;
        Ok(())
    }

    /// Run one compaction pass now, even if nothing changed since the last.
    ///
    /// Returns `false` when there were fewer than two segments.
    pub fn compact(&self) -> Result<bool> {
        self.inner.check_open()?;
        self.inner.compact(true)
    }

    /// Stop the compactor and sync the WAL.
    ///
    /// An in-flight compaction pass finishes first. Subsequent operations
    /// return [`KvError::Closed`]. Calling `close` more than once is harmless.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(handle) = self.compactor.lock().take() {
            drop(handle.stop);
            if handle.thread.join().is_err() {
                warn!(dir = %self.inner.dir.display(), "compactor thread panicked");
            }
        }

        self.inner.state.write().wal.sync()?;
        info!(dir = %self.inner.dir.display(), "shard closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Root directory of this shard
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Current segment set (oldest first)
    pub fn segments(&self) -> Arc<SegmentSet> {
        Arc::clone(&self.inner.state.read().segments)
    }

    /// Copy of the memtable contents in key order
    pub fn memtable_entries(&self) -> Vec<(String, String)> {
        self.inner
            .state
            .read()
            .memtable
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    pub fn stats(&self) -> ShardStats {
        let state = self.inner.state.read();
        ShardStats {
            memtable_entries: state.memtable.len(),
            memtable_bytes: state.memtable.size(),
            segment_count: state.segments.len(),
            dirty: state.dirty,
        }
    }
}

impl Storage for Shard {
    fn get(&self, key: &str) -> Result<String> {
        Shard::get(self, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Shard::set(self, key, value)
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(dir = %self.inner.dir.display(), error = %e, "error while closing shard");
        }
    }
}

impl ShardInner {
    fn recover(dir: &Path, config: &Config) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let wal_dir = dir.join(Shard::WAL_DIR);

        let (store, segments) =
            SegmentStore::open(&dir.join(Shard::SEGMENT_DIR), config.segment_length)?;

        // Replay oldest file first so later writes win
        let mut memtable = MemTable::new(config.memtable_size_limit);
        let mut replayed = Vec::new();
        for path in list_wal_files(&wal_dir)? {
            let (entries, result) = match WalRecovery::recover(&path) {
                Ok(recovered) => recovered,
                Err(e) => {
                    set_aside_wal(&path, &e);
                    continue;
                }
            };
            info!(
                path = %path.display(),
                recovered = result.entries_recovered,
                corrupted = result.entries_corrupted,
                last_lsn = result.last_lsn,
                "WAL replayed"
            );
            for entry in entries {
                // Only possible if segment_length shrank since the write
                if let Err(e) = check_fits(&entry.key, &entry.value, config.segment_length) {
                    error!(key = %entry.key, error = %e, "dropping recovered entry that no segment can hold");
                    continue;
                }
                memtable.replay(entry.key, entry.value);
            }
            replayed.push(path);
        }

        let mut wal = WalWriter::open(&wal_dir, config.wal_sync_strategy)?;
        for (key, value) in memtable.iter() {
            wal.append(key, value)?;
        }
        wal.sync()?;

        // The recovered entries are durable again; the replayed files can go
        for path in &replayed {
            fs::remove_file(path)?;
        }

        let dirty = segments.len() >= MIN_SEGMENTS_TO_COMPACT;
        let inner = Self {
            dir: dir.to_path_buf(),
            store,
            state: RwLock::new(ShardState {
                memtable,
                frozen: None,
                wal,
                unflushed_wals: Vec::new(),
                segments: Arc::new(segments),
                dirty,
            }),
            flush_lock: Mutex::new(()),
            merge_lock: Mutex::new(()),
            mem_new_file_limit: config.memtable_size_limit,
            closed: AtomicBool::new(false),
        };

        if inner.state.read().memtable.is_over_capacity() {
            if let Err(e) = inner.flush() {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "flush of recovered memtable failed, keeping it in memory"
                );
            }
        }

        let stats = {
            let state = inner.state.read();
            (state.memtable.len(), state.segments.len())
        };
        info!(
            dir = %dir.display(),
            memtable_entries = stats.0,
            segments = stats.1,
            "shard opened"
        );

        Ok(inner)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }

    /// Write the memtable out as the newest segment.
    ///
    /// Steps:
    /// 1. Under the write lock: rotate the WAL, swap in an empty memtable and
    ///    keep the full one readable as `frozen`
    /// 2. Build the segment with no lock held
    /// 3. Under the write lock: publish the segment and drop `frozen`
    /// 4. Delete the WAL files the segment now covers
    ///
    /// If the build fails the frozen entries go back into the memtable
    /// (newer writes win) and their WAL files are kept for the next flush.
    fn flush(&self) -> Result<bool> {
        let _flush = self.flush_lock.lock();

        let (frozen, wal_files) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            if state.memtable.is_empty() {
                return Ok(false);
            }

            let mut wal_files = state.wal.rotate()?;
            wal_files.append(&mut state.unflushed_wals);

            let fresh = MemTable::new(state.memtable.max_size());
            let frozen = Arc::new(std::mem::replace(&mut state.memtable, fresh));
            state.frozen = Some(Arc::clone(&frozen));
            (frozen, wal_files)
        };

        let segment = match self.store.flush(&frozen) {
            Ok(segment) => segment,
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "memtable flush failed");
                let mut guard = self.state.write();
                let state = &mut *guard;
                for (key, value) in frozen.iter() {
                    if state.memtable.find(key).is_none() {
                        state.memtable.replay(key.to_owned(), value.to_owned());
                    }
                }
                state.frozen = None;
                state.unflushed_wals = wal_files;
                return Err(e);
            }
        };

        info!(
            segment = %segment.id(),
            entries = frozen.len(),
            bytes = frozen.size(),
            "memtable flushed"
        );

        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            state.segments = Arc::new(state.segments.with_appended(segment));
            state.frozen = None;
            state.dirty = true;
        }

        // Entries are durable in the segment now
        for path in &wal_files {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to delete flushed WAL file");
            }
        }
        Ok(true)
    }

    /// One compaction pass; `force` ignores the dirty mark
    fn compact(&self, force: bool) -> Result<bool> {
        let _pass = self.merge_lock.lock();

        let snapshot = match self.compaction_snapshot(force) {
            Some(snapshot) => snapshot,
            None => return Ok(false),
        };

        let merged = Merger::new(&self.store, self.mem_new_file_limit).compact(snapshot.segments())?;
        self.install_compacted(&snapshot, merged)?;
        Ok(true)
    }

    /// Current segment set, if it is worth merging
    fn compaction_snapshot(&self, force: bool) -> Option<Arc<SegmentSet>> {
        let state = self.state.read();
        if state.segments.len() < MIN_SEGMENTS_TO_COMPACT || !(force || state.dirty) {
            return None;
        }
        Some(Arc::clone(&state.segments))
    }

    /// Replace `snapshot` with `merged` at the front of the current set
    fn install_compacted(&self, snapshot: &SegmentSet, merged: Vec<Arc<Segment>>) -> Result<()> {
        let mut state = self.state.write();
        if !state.segments.starts_with(snapshot) {
            // Outputs are still obsolete and vanish with `merged`
            return Err(KvError::CompactionAborted(
                "segment set changed during compaction".into(),
            ));
        }

        let newer = &state.segments.segments()[snapshot.len()..];
        let mut next = merged.clone();
        next.extend(newer.iter().cloned());
        let dirty = !newer.is_empty();

        for segment in &merged {
            segment.retain();
        }
        for segment in snapshot.segments() {
            if !merged.iter().any(|m| Arc::ptr_eq(m, segment)) {
                segment.mark_obsolete();
            }
        }

        state.segments = Arc::new(SegmentSet::new(next));
        state.dirty = dirty;
        drop(state);

        info!(
            dir = %self.dir.display(),
            inputs = snapshot.len(),
            outputs = merged.len(),
            "segment set compacted"
        );
        Ok(())
    }
}

/// Rename an unreadable WAL file out of the replay set, keeping its contents
fn set_aside_wal(path: &Path, cause: &KvError) {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(UNREADABLE_WAL_SUFFIX);
    let target = path.with_file_name(name);

    match fs::rename(path, &target) {
        Ok(()) => error!(
            path = %path.display(),
            moved_to = %target.display(),
            error = %cause,
            "WAL file could not be replayed, set aside"
        ),
        Err(e) => error!(
            path = %path.display(),
            error = %cause,
            rename_error = %e,
            "WAL file could not be replayed and was left in place"
        ),
    }
}

/// Spawn the timer-driven compaction thread for one shard
fn spawn_compactor(inner: Arc<ShardInner>, interval: Duration) -> Result<CompactorHandle> {
    let (stop, stopped) = channel::bounded::<()>(0);
    let name = format!(
        "shardkv-compactor-{}",
        inner.dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );

    let thread = thread::Builder::new().name(name).spawn(move || loop {
        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => match inner.compact(false) {
                Ok(true) => debug!(dir = %inner.dir.display(), "background compaction pass done"),
                Ok(false) => {}
                Err(e) => warn!(
                    dir = %inner.dir.display(),
                    error = %e,
                    "background compaction aborted, keeping previous segments"
                ),
            },
            // Stop signal or sender dropped
            _ => break,
        }
    })?;

    Ok(CompactorHandle { stop, thread })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &Path) -> Shard {
        let config = Config::builder()
            .compaction_interval(Duration::from_secs(3600))
            .build();
        Shard::open(dir, &config).unwrap()
    }

    /// Two flushed segments: {a:1} then {a:2, b:1}
    fn two_segments(shard: &Shard) {
        shard.set("a", "1").unwrap();
        shard.flush().unwrap();
        shard.set("a", "2").unwrap();
        shard.set("b", "1").unwrap();
        shard.flush().unwrap();
    }

    #[test]
    fn test_flush_during_merge_is_kept_after_output() {
        let temp = TempDir::new().unwrap();
        let shard = open(temp.path());
        two_segments(&shard);

        let inner = &shard.inner;
        let snapshot = inner.compaction_snapshot(true).unwrap();
        let merged = Merger::new(&inner.store, inner.mem_new_file_limit)
            .compact(snapshot.segments())
            .unwrap();

        // Lands between the snapshot and the swap
        shard.set("a", "3").unwrap();
        shard.flush().unwrap();
        let late = shard.segments().segments()[2].id();

        inner.install_compacted(&snapshot, merged).unwrap();
        drop(snapshot);

        let ids = shard.segments().ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < late);
        assert_eq!(ids[1], late);
        assert_eq!(shard.get("a").unwrap(), "3");
        assert_eq!(shard.get("b").unwrap(), "1");
        assert!(shard.stats().dirty);

        drop(shard);
        let shard = open(temp.path());
        assert_eq!(shard.segments().len(), 2);
        assert_eq!(shard.get("a").unwrap(), "3");
    }

    #[test]
    fn test_swap_rejected_when_snapshot_was_replaced() {
        let temp = TempDir::new().unwrap();
        let shard = open(temp.path());
        two_segments(&shard);

        let inner = &shard.inner;
        let snapshot = inner.compaction_snapshot(true).unwrap();
        let merged = Merger::new(&inner.store, inner.mem_new_file_limit)
            .compact(snapshot.segments())
            .unwrap();
        let stale_output = merged[0].data_path().to_path_buf();

        // A newer flush and another pass replace the snapshot's segments first
        shard.set("c", "1").unwrap();
        shard.flush().unwrap();
        assert!(shard.compact().unwrap());
        let current = shard.segments().ids();

        let err = inner.install_compacted(&snapshot, merged).unwrap_err();

        assert!(matches!(err, KvError::CompactionAborted(_)));
        assert_eq!(shard.segments().ids(), current);
        assert!(!stale_output.exists());
        assert_eq!(shard.get("a").unwrap(), "2");
        assert_eq!(shard.get("c").unwrap(), "1");
    }

    #[test]
    fn test_unreadable_wal_is_set_aside_not_deleted() {
        let temp = TempDir::new().unwrap();
        let wal_dir = temp.path().join(Shard::WAL_DIR);
        fs::create_dir_all(&wal_dir).unwrap();
        let path = wal_dir.join(format!("{:020}", 7));
        fs::write(&path, b"still needed").unwrap();

        set_aside_wal(&path, &KvError::WalCorruption("unreadable".into()));

        let moved = wal_dir.join(format!("{:020}.corrupt", 7));
        assert!(!path.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"still needed");
        assert!(list_wal_files(&wal_dir).unwrap().is_empty());

        // Reopening neither replays nor removes it
        let shard = open(temp.path());
        assert!(shard.memtable_entries().is_empty());
        drop(shard);
        assert!(moved.exists());
    }

    #[test]
    fn test_frozen_memtable_is_readable() {
        let temp = TempDir::new().unwrap();
        let shard = open(temp.path());
        shard.set("k", "v").unwrap();

        {
            let mut state = shard.inner.state.write();
            let mut frozen = MemTable::new(1024);
            frozen.add("frozen".into(), "yes".into()).unwrap();
            state.frozen = Some(Arc::new(frozen));
        }

        assert_eq!(shard.get("frozen").unwrap(), "yes");
        assert_eq!(shard.get("k").unwrap(), "v");
    }
}
