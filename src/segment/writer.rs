//! Segment serialisation.
//!
//! A segment is built from an already-sorted posting stream, written to a
//! temporary file, fsynced, and atomically renamed into place. The file is
//! never touched again afterwards.

use std::io::Write;

use ahash::AHashSet;
use log::debug;

use crate::error::Result;
use crate::segment::format::{encode_block, SegmentHeader, HEADER_SIZE, SKIP_ENTRY_SIZE};
use crate::segment::{segment_file_name, segment_temp_file_name, DeletedDocs, SegmentDescriptor};
use crate::storage::Storage;
use crate::util::bloom::BloomFilter;

/// A freshly written segment, with the in-memory artefacts the index keeps
/// alongside the file.
#[derive(Debug)]
pub struct NewSegment {
    /// Manifest descriptor for the segment (empty tombstone set).
    pub descriptor: SegmentDescriptor,
    /// Sorted distinct doc ids, for deletion propagation.
    pub doc_ids: Vec<u32>,
    /// Bloom filter over `doc_ids`, seeded into the segment reader.
    pub bloom: BloomFilter,
}

/// Serialise a sorted posting stream into `segment_<id>.dat`.
///
/// The stream must be ordered by `(hash, doc_id)`; duplicates are preserved.
/// Returns `None` without creating a file when the stream is empty (a merge
/// can tombstone every input posting away).
pub fn write_segment<I>(
    storage: &dyn Storage,
    segment_id: u64,
    block_size: u32,
    postings: I,
) -> Result<Option<NewSegment>>
where
    I: IntoIterator<Item = Result<(u32, u32)>>,
{
    let mut blocks: Vec<u8> = Vec::new();
    let mut skip: Vec<u8> = Vec::new();
    let mut block: Vec<(u32, u32)> = Vec::with_capacity(block_size as usize);

    let mut posting_count: u32 = 0;
    let mut min_hash = u32::MAX;
    let mut max_hash = 0u32;
    let mut docs: AHashSet<u32> = AHashSet::new();

    let mut flush_block = |block: &mut Vec<(u32, u32)>, blocks: &mut Vec<u8>, skip: &mut Vec<u8>| {
        skip.extend_from_slice(&block[0].0.to_le_bytes());
        skip.extend_from_slice(&((HEADER_SIZE + blocks.len()) as u64).to_le_bytes());
        encode_block(block, blocks);
        block.clear();
    };

    for posting in postings {
        let (hash, doc_id) = posting?;
        debug_assert!(block.last().map_or(true, |&p| p <= (hash, doc_id)));

        block.push((hash, doc_id));
        posting_count += 1;
        min_hash = min_hash.min(hash);
        max_hash = max_hash.max(hash);
        docs.insert(doc_id);

        if block.len() == block_size as usize {
            flush_block(&mut block, &mut blocks, &mut skip);
        }
    }
    if !block.is_empty() {
        flush_block(&mut block, &mut blocks, &mut skip);
    }

    if posting_count == 0 {
        return Ok(None);
    }

    debug_assert_eq!(
        skip.len(),
        crate::segment::format::block_count(posting_count, block_size) * SKIP_ENTRY_SIZE
    );

    let header = SegmentHeader {
        segment_id,
        doc_count: docs.len() as u32,
        posting_count,
        min_hash,
        max_hash,
        block_size,
        blocks_offset: HEADER_SIZE as u64,
        skip_offset: (HEADER_SIZE + blocks.len()) as u64,
        checksum: {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&blocks);
            hasher.update(&skip);
            hasher.finalize()
        },
    };

    let temp_name = segment_temp_file_name(segment_id);
    let mut output = storage.create_output(&temp_name)?;
    header.write_to(&mut output)?;
    output.write_all(&blocks)?;
    output.write_all(&skip)?;
    output.flush_and_sync()?;
    drop(output);

    let file_name = segment_file_name(segment_id);
    storage.rename_file(&temp_name, &file_name)?;

    debug!(
        "wrote {file_name}: {} postings, {} docs, {} blocks",
        posting_count,
        docs.len(),
        skip.len() / SKIP_ENTRY_SIZE
    );

    let mut doc_ids: Vec<u32> = docs.into_iter().collect();
    doc_ids.sort_unstable();
    let bloom = BloomFilter::from_doc_ids(&doc_ids);

    Ok(Some(NewSegment {
        descriptor: SegmentDescriptor {
            segment_id,
            doc_count: doc_ids.len() as u32,
            posting_count,
            min_hash,
            max_hash,
            deleted_docs: DeletedDocs::new(),
        },
        doc_ids,
        bloom,
    }))
}
