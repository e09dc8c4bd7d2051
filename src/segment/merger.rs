//! K-way streaming merge of segments.
//!
//! The merger reads immutable input segments, drops tombstoned postings, and
//! streams the sorted union into a new segment file. The output reuses the
//! highest input segment id so it keeps the inputs' place in the
//! supersession order; its own tombstone set starts empty, because every
//! posting superseded by a segment outside the merge set was already
//! tombstoned in its input.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::info;

use crate::error::Result;
use crate::segment::format::PostingIter;
use crate::segment::reader::SegmentReader;
use crate::segment::writer::{write_segment, NewSegment};
use crate::segment::DeletedDocs;
use crate::storage::Storage;

/// One merge input: a segment reader plus its effective tombstone set.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub reader: &'a SegmentReader,
    pub deleted: &'a DeletedDocs,
}

/// Merge `inputs` into one new segment.
///
/// Returns `None` when every input posting is tombstoned; the caller then
/// drops the inputs from the manifest without a replacement.
pub fn merge_segments(
    storage: &dyn Storage,
    block_size: u32,
    inputs: &[MergeInput<'_>],
) -> Result<Option<NewSegment>> {
    assert!(!inputs.is_empty(), "merge requires at least one input");

    let output_id = inputs
        .iter()
        .map(|input| input.reader.segment_id())
        .max()
        .expect("non-empty inputs");

    let merged = MergedPostings::new(inputs)?;
    let result = write_segment(storage, output_id, block_size, merged)?;

    info!(
        "merged {} segments into segment {output_id} ({} postings)",
        inputs.len(),
        result
            .as_ref()
            .map_or(0, |segment| segment.descriptor.posting_count)
    );

    Ok(result)
}

/// Heap-based k-way merge over per-segment posting iterators, filtering
/// tombstoned doc ids as they are pulled.
struct MergedPostings<'a> {
    iters: Vec<PostingIter<'a>>,
    deleted: Vec<&'a DeletedDocs>,
    heap: BinaryHeap<Reverse<(u32, u32, usize)>>,
    failed: bool,
}

impl<'a> MergedPostings<'a> {
    fn new(inputs: &[MergeInput<'a>]) -> Result<MergedPostings<'a>> {
        let mut merged = MergedPostings {
            iters: Vec::with_capacity(inputs.len()),
            deleted: Vec::with_capacity(inputs.len()),
            heap: BinaryHeap::with_capacity(inputs.len()),
            failed: false,
        };

        for input in inputs {
            merged.iters.push(input.reader.iter_postings()?);
            merged.deleted.push(input.deleted);
        }
        for source in 0..merged.iters.len() {
            merged.advance(source)?;
        }
        Ok(merged)
    }

    /// Pull the next live posting from `source` onto the heap.
    fn advance(&mut self, source: usize) -> Result<()> {
        for posting in self.iters[source].by_ref() {
            let (hash, doc_id) = posting?;
            if self.deleted[source].contains(doc_id) {
                continue;
            }
            self.heap.push(Reverse((hash, doc_id, source)));
            return Ok(());
        }
        Ok(())
    }
}

impl<'a> Iterator for MergedPostings<'a> {
    type Item = Result<(u32, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse((hash, doc_id, source)) = self.heap.pop()?;
        if let Err(e) = self.advance(source) {
            self.failed = true;
            return Some(Err(e));
        }
        Some(Ok((hash, doc_id)))
    }
}
