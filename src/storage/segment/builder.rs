//! Segment Builder
//!
//! Writes sorted key-value pairs into a new compressed segment.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use super::index::publish_journal;
use super::{encode_pair, PageRange, Segment, SegmentId, SparseIndex, PAIR_SEPARATOR};
use super::{JOURNAL_DIR, JOURNAL_EXT, PAYLOAD_EXT, TMP_EXT};
use crate::error::{KvError, Result};

/// Uncompressed page boundaries collected while writing the temp file
struct RawPage {
    first_key: String,
    range: PageRange,
}

impl Segment {
    /// Build a segment in `dir` from pairs in strictly ascending key order.
    ///
    /// Steps:
    /// 1. Write `key:value;...` text to `{id}.tmp`, cutting a new page whenever
    ///    the next pair would push the page past `segment_length`
    /// 2. Compress every page on its own into `{id}.gz`
    /// 3. Publish the sparse index (compressed offsets) as `journal/{id}.idx`
    ///
    /// Fails with [`KvError::EntryTooLarge`] if one encoded pair is longer
    /// than `segment_length`. Nothing is left on disk on failure.
    pub fn build_from_sorted<I, K, V>(
        dir: &Path,
        id: SegmentId,
        entries: I,
        segment_length: usize,
    ) -> Result<Segment>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let paths = SegmentPaths::new(dir, id);
        let result = build(&paths, id, entries, segment_length);
        if result.is_err() {
            paths.remove_partial();
        }
        result
    }
}

struct SegmentPaths {
    raw: PathBuf,
    data: PathBuf,
    journal_tmp: PathBuf,
    journal: PathBuf,
}

impl SegmentPaths {
    fn new(dir: &Path, id: SegmentId) -> Self {
        let journal_dir = dir.join(JOURNAL_DIR);
        Self {
            raw: dir.join(format!("{}.{}", id, TMP_EXT)),
            data: dir.join(format!("{}.{}", id, PAYLOAD_EXT)),
            journal_tmp: journal_dir.join(format!("{}.{}", id, TMP_EXT)),
            journal: journal_dir.join(format!("{}.{}", id, JOURNAL_EXT)),
        }
    }

    fn remove_partial(&self) {
        for path in [&self.raw, &self.data, &self.journal_tmp, &self.journal] {
            let _ = fs::remove_file(path);
        }
    }
}

fn build<I, K, V>(
    paths: &SegmentPaths,
    id: SegmentId,
    entries: I,
    segment_length: usize,
) -> Result<Segment>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    if let Some(journal_dir) = paths.journal.parent() {
        fs::create_dir_all(journal_dir)?;
    }

    let (pages, entry_count) = write_raw(&paths.raw, entries, segment_length)?;
    let index = compress_pages(&paths.raw, &paths.data, &pages)?;
    fs::remove_file(&paths.raw)?;
    publish_journal(&index, &paths.journal_tmp, &paths.journal)?;

    debug!(
        segment = %id,
        entries = entry_count,
        pages = index.len(),
        "segment built"
    );

    Ok(Segment::new(
        id,
        paths.data.clone(),
        paths.journal.clone(),
        index,
    ))
}

/// Step 1: uncompressed pages into the temp file
fn write_raw<I, K, V>(path: &Path, entries: I, segment_length: usize) -> Result<(Vec<RawPage>, u64)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let mut pages: Vec<RawPage> = Vec::new();
    let mut offset: u64 = 0;
    let mut page_len: usize = 0;
    let mut last_key: Option<String> = None;
    let mut entry_count = 0u64;

    for (key, value) in entries {
        let (key, value) = (key.as_ref(), value.as_ref());

        if let Some(prev) = last_key.as_deref() {
            if key <= prev {
                return Err(KvError::Storage(format!(
                    "segment input out of order: {:?} after {:?}",
                    key, prev
                )));
            }
        }

        let encoded = encode_pair(key, value);
        if encoded.len() > segment_length {
            return Err(KvError::EntryTooLarge {
                size: encoded.len(),
                limit: segment_length,
            });
        }

        let starts_page = pages.is_empty() || page_len + 1 + encoded.len() > segment_length;
        if starts_page {
            pages.push(RawPage {
                first_key: key.to_string(),
                range: PageRange {
                    start: offset,
                    end: offset,
                },
            });
            page_len = 0;
        } else {
            writer.write_all(&[PAIR_SEPARATOR as u8])?;
            page_len += 1;
            offset += 1;
        }

        writer.write_all(encoded.as_bytes())?;
        page_len += encoded.len();
        offset += encoded.len() as u64;
        if let Some(page) = pages.last_mut() {
            page.range.end = offset;
        }

        last_key = Some(key.to_string());
        entry_count += 1;
    }

    writer.flush()?;
    Ok((pages, entry_count))
}

/// Step 2: compress each raw page into the payload, returning compressed offsets
fn compress_pages(raw_path: &Path, data_path: &Path, pages: &[RawPage]) -> Result<SparseIndex> {
    let mut raw = File::open(raw_path)?;
    let mut out = BufWriter::new(File::create(data_path)?);
    let mut index = SparseIndex::new();
    let mut position: u64 = 0;
    let mut buf = Vec::new();

    for page in pages {
        buf.resize(page.range.len() as usize, 0);
        raw.seek(SeekFrom::Start(page.range.start))?;
        raw.read_exact(&mut buf)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&buf)?;
        let compressed = encoder.finish()?;

        out.write_all(&compressed)?;
        let end = position + compressed.len() as u64;
        index.insert(page.first_key.clone(), PageRange { start: position, end });
        position = end;
    }

    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(index)
}
