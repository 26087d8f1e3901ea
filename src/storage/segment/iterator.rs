//! Segment Iterator
//!
//! Sequential iteration over all pairs in a segment. Pages are read and
//! decompressed lazily, one at a time.

use std::vec;

use super::{PageRange, Segment};
use crate::error::Result;

/// Iterator over segment pairs in ascending key order
pub struct SegmentIterator<'a> {
    segment: &'a Segment,
    pages: Vec<PageRange>,
    next_page: usize,
    current: vec::IntoIter<(String, String)>,
    failed: bool,
}

impl<'a> SegmentIterator<'a> {
    pub(super) fn new(segment: &'a Segment) -> Self {
        Self {
            segment,
            pages: segment.pages(),
            next_page: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl Iterator for SegmentIterator<'_> {
    type Item = Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(pair) = self.current.next() {
                return Some(Ok(pair));
            }

            let range = *self.pages.get(self.next_page)?;
            self.next_page += 1;
            match self.segment.read_page(range) {
                Ok(pairs) => self.current = pairs.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
