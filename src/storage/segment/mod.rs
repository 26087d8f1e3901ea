//! Segment Module
//!
//! Immutable, compressed, sparse-indexed sorted files on disk.
//!
//! ## File Layout
//! ```text
//! <shard-dir>/segments/
//!   ├── {id}.gz              payload: pages, each gzip-compressed on its own
//!   └── journal/{id}.idx     sparse index, one `first_key:start:end` line per page
//! ```
//!
//! ## Page Format (before compression)
//! ```text
//! key:value;key:value;key:value
//! ```
//! A page never exceeds `segment_length` bytes. `\`, `:`, `;` and newline
//! inside keys and values are backslash-escaped, so any UTF-8 string can be
//! stored. The journal's `start`/`end` are byte offsets of the compressed
//! page inside the payload file.
//!
//! A journal is only renamed into place after its payload is fully written
//! and synced, so a journal on disk means the segment is complete.

mod builder;
mod index;
mod iterator;
mod reader;

use std::fmt;
use std::str::FromStr;

pub use index::{PageRange, SparseIndex};
pub use iterator::SegmentIterator;
pub use reader::Segment;

use crate::error::{KvError, Result};

// =============================================================================
// Shared Constants (used by builder, reader, store)
// =============================================================================

/// Extension of compressed payload files
pub const PAYLOAD_EXT: &str = "gz";

/// Extension of sparse-index journal files
pub const JOURNAL_EXT: &str = "idx";

/// Extension of files that are still being written
pub const TMP_EXT: &str = "tmp";

/// Journal subdirectory inside the segment directory
pub const JOURNAL_DIR: &str = "journal";

const PAIR_SEPARATOR: char = ';';
const KV_SEPARATOR: char = ':';
const ESCAPE: char = '\\';

// =============================================================================
// Segment Identity
// =============================================================================

/// Identifier of a segment; ordering is creation order.
///
/// - A flushed segment gets `(seq, 0, 0)` with a fresh `seq`.
/// - A compaction output gets `(S, G + 1, part)` where `S` is the newest input's
///   `seq` and `G` the highest generation among inputs with that `seq`.
///
/// Merged output therefore sorts after every input it replaces and before any
/// segment flushed later, which keeps newest-wins ordering intact on restart
/// even if a crash leaves inputs and outputs side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    pub seq: u64,
    pub generation: u32,
    pub part: u32,
}

impl SegmentId {
    pub fn flushed(seq: u64) -> Self {
        Self {
            seq,
            generation: 0,
            part: 0,
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}-{:05}-{:05}", self.seq, self.generation, self.part)
    }
}

impl FromStr for SegmentId {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || KvError::Storage(format!("invalid segment id: {:?}", s));
        let mut parts = s.split('-');
        let seq = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let generation = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let part = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self {
            seq,
            generation,
            part,
        })
    }
}

// =============================================================================
// Text Encoding
// =============================================================================

/// Escape the reserved characters of the page and journal formats
pub(crate) fn escape(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            ESCAPE | KV_SEPARATOR | PAIR_SEPARATOR => {
                out.push(ESCAPE);
                out.push(c);
            }
            '\n' => {
                out.push(ESCAPE);
                out.push('n');
            }
            _ => out.push(c),
        }
    }
}

/// Encoded `key:value` form of one pair
pub(crate) fn encode_pair(key: &str, value: &str) -> String {
    let mut out = String::with_capacity(key.len() + value.len() + 1);
    escape(key, &mut out);
    out.push(KV_SEPARATOR);
    escape(value, &mut out);
    out
}

/// Fail with [`KvError::EntryTooLarge`] if the encoded pair cannot fit in a
/// single page of `segment_length` bytes.
pub fn check_fits(key: &str, value: &str, segment_length: usize) -> Result<()> {
    let size = encode_pair(key, value).len();
    if size > segment_length {
        return Err(KvError::EntryTooLarge {
            size,
            limit: segment_length,
        });
    }
    Ok(())
}

/// Undo [`escape`] on a whole string; `None` on a dangling or unknown escape
pub(crate) fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            match chars.next()? {
                'n' => out.push('\n'),
                e @ (ESCAPE | KV_SEPARATOR | PAIR_SEPARATOR) => out.push(e),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Split one decompressed page back into its pairs
pub(crate) fn parse_page(text: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    if text.is_empty() {
        return Ok(pairs);
    }

    let mut key: Option<String> = None;
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some('n') => current.push('\n'),
                Some(e @ (ESCAPE | KV_SEPARATOR | PAIR_SEPARATOR)) => current.push(e),
                other => {
                    return Err(KvError::Storage(format!(
                        "bad escape sequence in page: \\{:?}",
                        other
                    )))
                }
            },
            KV_SEPARATOR if key.is_none() => key = Some(std::mem::take(&mut current)),
            PAIR_SEPARATOR => {
                let k = key
                    .take()
                    .ok_or_else(|| KvError::Storage("page pair without ':'".into()))?;
                pairs.push((k, std::mem::take(&mut current)));
            }
            _ => current.push(c),
        }
    }

    let k = key.ok_or_else(|| KvError::Storage("page pair without ':'".into()))?;
    pairs.push((k, current));
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_orders_by_creation() {
        let older = SegmentId::flushed(3);
        let merged = SegmentId {
            seq: 3,
            generation: 1,
            part: 7,
        };
        let newer = SegmentId::flushed(4);

        assert!(older < merged);
        assert!(merged < newer);
        assert_eq!(merged.to_string().parse::<SegmentId>().unwrap(), merged);
    }

    #[test]
    fn test_segment_id_rejects_garbage() {
        assert!("12-x-3".parse::<SegmentId>().is_err());
        assert!("1-2-3-4".parse::<SegmentId>().is_err());
    }

    #[test]
    fn test_page_with_reserved_characters() {
        let mut text = encode_pair("a:b", "x;y");
        text.push(PAIR_SEPARATOR);
        text.push_str(&encode_pair("line\nbreak", "back\\slash:"));

        let pairs = parse_page(&text).unwrap();

        assert_eq!(
            pairs,
            vec![
                ("a:b".to_string(), "x;y".to_string()),
                ("line\nbreak".to_string(), "back\\slash:".to_string()),
            ]
        );
    }

    #[test]
    fn test_value_may_be_empty() {
        let pairs = parse_page("k:").unwrap();
        assert_eq!(pairs, vec![("k".to_string(), String::new())]);
    }

    #[test]
    fn test_unescape_roundtrip() {
        let mut out = String::new();
        escape("a:b;c\\d\ne", &mut out);
        assert!(!out.contains('\n'));
        assert_eq!(unescape(&out).unwrap(), "a:b;c\\d\ne");
        assert_eq!(unescape("dangling\\"), None);
    }
}
