//! Compactor
//!
//! Folds a shard's segments into fewer, larger, deduplicated segments.
//!
//! ## Algorithm
//! `merge_descending` halves the segment list recursively, merges each half
//! down to one sorted run, then two-way merges the runs. A run is a list of
//! segments with disjoint, ascending key ranges (the output of one merge).
//!
//! The two-way merge streams both runs page by page. On equal keys the right
//! (newer) side wins and both sides advance; otherwise the smaller key is
//! emitted. Emitted pairs fill a pool bounded by `mem_new_file_limit` using
//! the memtable's size accounting; each full pool becomes a new segment.
//!
//! ## Output lifecycle
//! Every segment the compactor writes starts out obsolete: if it is dropped
//! without being [retained](Segment::retain) its files are removed. Consumed
//! intermediate runs and the outputs of an aborted run therefore clean up
//! after themselves, while the caller retains the final output only once it
//! has been swapped into the shard.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;

use tracing::{debug, info};

use super::manager::SegmentStore;
use super::segment::{Segment, SegmentId, SegmentIterator};
use crate::error::{KvError, Result};
use crate::memtable::entry_cost;

/// Merges segment runs for one shard
pub struct Merger<'a> {
    store: &'a SegmentStore,
    mem_new_file_limit: usize,
}

impl<'a> Merger<'a> {
    pub fn new(store: &'a SegmentStore, mem_new_file_limit: usize) -> Self {
        Self {
            store,
            mem_new_file_limit,
        }
    }

    /// Compact `segments` (oldest first) into one run.
    ///
    /// Any failure is reported as [`KvError::CompactionAborted`]; the inputs
    /// are never modified and partial output is discarded.
    pub fn compact(&self, segments: &[Arc<Segment>]) -> Result<Vec<Arc<Segment>>> {
        let inputs = segments.len();
        let output = self
            .merge_descending(segments)
            .map_err(|e| KvError::CompactionAborted(e.to_string()))?;

        info!(
            inputs,
            outputs = output.len(),
            "compaction merged segments"
        );
        Ok(output)
    }

    /// Recursive balanced merge; 0 or 1 segments are returned unchanged
    pub fn merge_descending(&self, segments: &[Arc<Segment>]) -> Result<Vec<Arc<Segment>>> {
        if segments.len() <= 1 {
            return Ok(segments.to_vec());
        }

        let mid = segments.len() / 2;
        let left = self.merge_descending(&segments[..mid])?;
        let right = self.merge_descending(&segments[mid..])?;
        // Intermediate runs are obsolete and go away with `left`/`right`.
        self.merge(&left, &right)
    }

    /// Two-way merge of an older run (`left`) and a newer run (`right`)
    pub fn merge(&self, left: &[Arc<Segment>], right: &[Arc<Segment>]) -> Result<Vec<Arc<Segment>>> {
        let mut output = OutputPool::new(self.store, output_id_base(left, right), self.mem_new_file_limit);
        let mut lhs = RunCursor::new(left).peekable();
        let mut rhs = RunCursor::new(right).peekable();

        loop {
            let step = match (lhs.peek(), rhs.peek()) {
                (None, None) => break,
                (Some(Err(_)), _) => return Err(take_err(&mut lhs)),
                (_, Some(Err(_))) => return Err(take_err(&mut rhs)),
                (Some(Ok(_)), None) => Ordering::Less,
                (None, Some(Ok(_))) => Ordering::Greater,
                (Some(Ok((lk, _))), Some(Ok((rk, _)))) => lk.cmp(rk),
            };

            let (key, value) = match step {
                Ordering::Less => next_ok(&mut lhs)?,
                Ordering::Greater => next_ok(&mut rhs)?,
                Ordering::Equal => {
                    // Newer side wins; the older value is dropped.
                    next_ok(&mut lhs)?;
                    next_ok(&mut rhs)?
                }
            };
            output.push(key, value)?;
        }

        let segments = output.finish()?;
        debug!(
            left = left.len(),
            right = right.len(),
            outputs = segments.len(),
            "merged runs"
        );
        Ok(segments)
    }
}

// =============================================================================
// Run Cursor
// =============================================================================

/// Streams the pairs of a run: its segments in order, each page by page
struct RunCursor<'a> {
    segments: std::slice::Iter<'a, Arc<Segment>>,
    current: Option<SegmentIterator<'a>>,
}

impl<'a> RunCursor<'a> {
    fn new(segments: &'a [Arc<Segment>]) -> Self {
        Self {
            segments: segments.iter(),
            current: None,
        }
    }
}

impl Iterator for RunCursor<'_> {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = self.current.as_mut() {
                if let Some(item) = iter.next() {
                    return Some(item);
                }
            }
            self.current = Some(self.segments.next()?.iter());
        }
    }
}

fn next_ok<I>(cursor: &mut Peekable<I>) -> Result<(String, String)>
where
    I: Iterator<Item = Result<(String, String)>>,
{
    match cursor.next() {
        Some(item) => item,
        None => Err(KvError::Storage("merge cursor exhausted unexpectedly".into())),
    }
}

fn take_err<I>(cursor: &mut Peekable<I>) -> KvError
where
    I: Iterator<Item = Result<(String, String)>>,
{
    match cursor.next() {
        Some(Err(e)) => e,
        _ => KvError::Storage("merge cursor lost its error".into()),
    }
}

// =============================================================================
// Output Pool
// =============================================================================

/// `(S, G + 1)` for a merge: `S` is the newest input seq, `G` the highest
/// generation among inputs carrying that seq.
fn output_id_base(left: &[Arc<Segment>], right: &[Arc<Segment>]) -> (u64, u32) {
    let ids = left.iter().chain(right).map(|s| s.id());
    let seq = ids.clone().map(|id| id.seq).max().unwrap_or(0);
    let generation = ids
        .filter(|id| id.seq == seq)
        .map(|id| id.generation)
        .max()
        .unwrap_or(0);
    (seq, generation + 1)
}

/// Pending pairs waiting to become the next output segment
struct OutputPool<'a> {
    store: &'a SegmentStore,
    seq: u64,
    generation: u32,
    limit: usize,
    pending: Vec<(String, String)>,
    pending_size: usize,
    built: Vec<Arc<Segment>>,
}

impl<'a> OutputPool<'a> {
    fn new(store: &'a SegmentStore, (seq, generation): (u64, u32), limit: usize) -> Self {
        Self {
            store,
            seq,
            generation,
            limit,
            pending: Vec::new(),
            pending_size: 0,
            built: Vec::new(),
        }
    }

    fn push(&mut self, key: String, value: String) -> Result<()> {
        let cost = entry_cost(&key, &value);
        if !self.pending.is_empty() && self.pending_size + cost > self.limit {
            self.cut()?;
        }
        self.pending_size += cost;
        self.pending.push((key, value));
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Arc<Segment>>> {
        if !self.pending.is_empty() {
            self.cut()?;
        }
        Ok(self.built)
    }

    fn cut(&mut self) -> Result<()> {
        let id = SegmentId {
            seq: self.seq,
            generation: self.generation,
            part: self.built.len() as u32 + 1,
        };
        let entries = std::mem::take(&mut self.pending);
        self.pending_size = 0;

        let segment = self.store.build(id, entries)?;
        segment.mark_obsolete();
        self.built.push(Arc::new(segment));
        Ok(())
    }
}
