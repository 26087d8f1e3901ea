//! Segment Reader
//!
//! Point lookups through the sparse index, page reads, and restore.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use super::iterator::SegmentIterator;
use super::{parse_page, PageRange, SegmentId, SparseIndex};
use crate::error::{KvError, Result};

/// An immutable on-disk segment with its in-memory sparse index.
///
/// Segments are shared as `Arc<Segment>`. A segment marked obsolete deletes
/// its payload and journal when the last handle is dropped, so a reader that
/// still holds an older segment set can finish its lookup.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    data_path: PathBuf,
    journal_path: PathBuf,
    index: SparseIndex,
    obsolete: AtomicBool,
}

impl Segment {
    pub(super) fn new(
        id: SegmentId,
        data_path: PathBuf,
        journal_path: PathBuf,
        index: SparseIndex,
    ) -> Self {
        Self {
            id,
            data_path,
            journal_path,
            index,
            obsolete: AtomicBool::new(false),
        }
    }

    /// Rebuild a segment from its journal alone; the payload is not read.
    ///
    /// Every page range must lie within the payload file, otherwise the
    /// journal is reported as [`KvError::CorruptIndex`].
    pub fn restore(data_path: &Path, journal_path: &Path, id: SegmentId) -> Result<Segment> {
        if !data_path.is_file() {
            return Err(KvError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("segment payload {} is missing", data_path.display()),
            )));
        }
        let index = SparseIndex::read_journal(journal_path)?;

        let payload_len = fs::metadata(data_path)?.len();
        if let Some(range) = index.pages().into_iter().find(|r| r.end > payload_len) {
            return Err(KvError::CorruptIndex {
                path: journal_path.to_path_buf(),
                reason: format!(
                    "page {}..{} past end of {} byte payload",
                    range.start, range.end, payload_len
                ),
            });
        }
        Ok(Segment::new(
            id,
            data_path.to_path_buf(),
            journal_path.to_path_buf(),
            index,
        ))
    }

    /// Look up `key`.
    ///
    /// `Ok(None)` when the key sorts before the first page (no I/O at all) or
    /// when the candidate page does not contain it.
    pub fn find(&self, key: &str) -> Result<Option<String>> {
        let range = match self.index.lookup(key) {
            Some(range) => range,
            None => return Ok(None),
        };

        let pairs = self.read_page(range)?;
        Ok(pairs.into_iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    /// Read and decompress one page
    pub fn read_page(&self, range: PageRange) -> Result<Vec<(String, String)>> {
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(range.start))?;

        let mut compressed = vec![0u8; range.len() as usize];
        file.read_exact(&mut compressed)?;

        let mut text = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut text)?;
        parse_page(&text)
    }

    /// Iterate over every pair, one page in memory at a time
    pub fn iter(&self) -> SegmentIterator<'_> {
        SegmentIterator::new(self)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    /// Page ranges in file order
    pub fn pages(&self) -> Vec<PageRange> {
        self.index.pages()
    }

    pub fn page_count(&self) -> usize {
        self.index.len()
    }

    /// Delete the files once the last handle goes away
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// Cancel a pending [`mark_obsolete`](Self::mark_obsolete)
    pub fn retain(&self) {
        self.obsolete.store(false, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        // Journal first: without it the payload is ignored at restore.
        for path in [&self.journal_path, &self.data_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete segment file"),
            }
        }
        debug!(segment = %self.id, "obsolete segment deleted");
    }
}
