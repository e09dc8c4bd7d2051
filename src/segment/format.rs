//! Segment file codec.
//!
//! A segment file is a single little-endian blob with three regions:
//!
//! 1. a fixed-size header;
//! 2. posting blocks — each block opens with its first posting in cleartext
//!    `(hash: u32, doc_id: u32)` followed by up to `block_size - 1` varint
//!    pairs `(hash_delta, doc_delta_or_reset)`: a zero hash delta keeps the
//!    hash and delta-encodes the doc id, a non-zero delta advances the hash
//!    and carries an absolute doc id;
//! 3. a skip table of fixed-width `(first_hash: u32, offset: u64)` entries,
//!    one per block, for binary search.
//!
//! The header checksum (CRC32) covers regions 2 and 3.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{FpIndexError, Result};
use crate::util::varint;

/// Magic number at the start of every segment file (`SEGF`).
pub const SEGMENT_MAGIC: u32 = u32::from_le_bytes(*b"SEGF");

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Fixed size of the segment header in bytes.
pub const HEADER_SIZE: usize = 56;

/// Fixed size of one skip-table entry in bytes.
pub const SKIP_ENTRY_SIZE: usize = 12;

/// The fixed-size segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_id: u64,
    pub doc_count: u32,
    pub posting_count: u32,
    pub min_hash: u32,
    pub max_hash: u32,
    pub block_size: u32,
    /// Byte offset of the posting-block region.
    pub blocks_offset: u64,
    /// Byte offset of the skip table; also the end of the block region.
    pub skip_offset: u64,
    /// CRC32 over everything after the header.
    pub checksum: u32,
}

impl SegmentHeader {
    /// Serialise the header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(SEGMENT_MAGIC)?;
        writer.write_u32::<LittleEndian>(SEGMENT_FORMAT_VERSION)?;
        writer.write_u64::<LittleEndian>(self.segment_id)?;
        writer.write_u32::<LittleEndian>(self.doc_count)?;
        writer.write_u32::<LittleEndian>(self.posting_count)?;
        writer.write_u32::<LittleEndian>(self.min_hash)?;
        writer.write_u32::<LittleEndian>(self.max_hash)?;
        writer.write_u32::<LittleEndian>(self.block_size)?;
        writer.write_u64::<LittleEndian>(self.blocks_offset)?;
        writer.write_u64::<LittleEndian>(self.skip_offset)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    /// Parse and validate a header from the start of a segment file.
    pub fn read_from(data: &[u8]) -> Result<SegmentHeader> {
        if data.len() < HEADER_SIZE {
            return Err(FpIndexError::corrupt_segment(format!(
                "file too short for header: {} bytes",
                data.len()
            )));
        }

        let magic = LittleEndian::read_u32(&data[0..4]);
        if magic != SEGMENT_MAGIC {
            return Err(FpIndexError::corrupt_segment(format!(
                "bad magic: {magic:#010x}"
            )));
        }

        let version = LittleEndian::read_u32(&data[4..8]);
        if version != SEGMENT_FORMAT_VERSION {
            return Err(FpIndexError::corrupt_segment(format!(
                "unsupported format version: {version}"
            )));
        }

        let header = SegmentHeader {
            segment_id: LittleEndian::read_u64(&data[8..16]),
            doc_count: LittleEndian::read_u32(&data[16..20]),
            posting_count: LittleEndian::read_u32(&data[20..24]),
            min_hash: LittleEndian::read_u32(&data[24..28]),
            max_hash: LittleEndian::read_u32(&data[28..32]),
            block_size: LittleEndian::read_u32(&data[32..36]),
            blocks_offset: LittleEndian::read_u64(&data[36..44]),
            skip_offset: LittleEndian::read_u64(&data[44..52]),
            checksum: LittleEndian::read_u32(&data[52..56]),
        };

        if header.block_size == 0 {
            return Err(FpIndexError::corrupt_segment("zero block size"));
        }
        if header.blocks_offset != HEADER_SIZE as u64
            || header.skip_offset < header.blocks_offset
            || header.skip_offset > data.len() as u64
        {
            return Err(FpIndexError::corrupt_segment("inconsistent region offsets"));
        }

        let expected_blocks = block_count(header.posting_count, header.block_size);
        let skip_bytes = data.len() as u64 - header.skip_offset;
        if skip_bytes != (expected_blocks * SKIP_ENTRY_SIZE) as u64 {
            return Err(FpIndexError::corrupt_segment(format!(
                "skip table has {skip_bytes} bytes, expected {} entries",
                expected_blocks
            )));
        }

        Ok(header)
    }
}

/// Number of posting blocks for a given posting count.
pub fn block_count(posting_count: u32, block_size: u32) -> usize {
    (posting_count as usize).div_ceil(block_size as usize)
}

/// CRC32 over the block and skip-table regions.
pub fn region_checksum(data: &[u8], blocks_offset: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[blocks_offset as usize..]);
    hasher.finalize()
}

/// Encode one block of postings (at most `block_size` entries, sorted).
pub fn encode_block(postings: &[(u32, u32)], out: &mut Vec<u8>) {
    let (first_hash, first_doc) = postings[0];
    out.extend_from_slice(&first_hash.to_le_bytes());
    out.extend_from_slice(&first_doc.to_le_bytes());

    let mut prev_hash = first_hash;
    let mut prev_doc = first_doc;
    for &(hash, doc_id) in &postings[1..] {
        let hash_delta = hash - prev_hash;
        varint::encode_u32(hash_delta, out);
        if hash_delta == 0 {
            varint::encode_u32(doc_id - prev_doc, out);
        } else {
            varint::encode_u32(doc_id, out);
        }
        prev_hash = hash;
        prev_doc = doc_id;
    }
}

/// Skip-table view over the raw bytes of region 3.
#[derive(Debug, Clone, Copy)]
pub struct SkipTable<'a> {
    data: &'a [u8],
}

impl<'a> SkipTable<'a> {
    /// Wrap the skip-table region; length must be a multiple of the entry size.
    pub fn new(data: &'a [u8]) -> SkipTable<'a> {
        debug_assert!(data.len() % SKIP_ENTRY_SIZE == 0);
        SkipTable { data }
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.data.len() / SKIP_ENTRY_SIZE
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First hash of block `index`.
    pub fn first_hash(&self, index: usize) -> u32 {
        LittleEndian::read_u32(&self.data[index * SKIP_ENTRY_SIZE..])
    }

    /// File offset of block `index`.
    pub fn block_offset(&self, index: usize) -> u64 {
        LittleEndian::read_u64(&self.data[index * SKIP_ENTRY_SIZE + 4..])
    }

    /// Index of the block where a scan for `hash` must start.
    ///
    /// Postings for one hash can spill across block boundaries, so the scan
    /// starts one block before the first block whose `first_hash` reaches the
    /// target.
    pub fn start_block_for(&self, hash: u32) -> usize {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.first_hash(mid) < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.saturating_sub(1)
    }
}

/// Streaming decoder over the posting blocks of one segment.
///
/// Yields `(hash, doc_id)` pairs in `(hash, doc_id)` order, crossing block
/// boundaries transparently. Any structural problem in the stream surfaces as
/// a `CorruptSegment` error and ends iteration.
#[derive(Debug)]
pub struct PostingIter<'a> {
    data: &'a [u8],
    pos: usize,
    /// End of the block region.
    end: usize,
    remaining: u32,
    block_size: u32,
    block_remaining: u32,
    cur_hash: u32,
    cur_doc: u32,
    failed: bool,
}

impl<'a> PostingIter<'a> {
    /// Decode from the start of block `start_block` to the end of the segment.
    pub fn new(data: &'a [u8], header: &SegmentHeader, start_block: usize) -> Result<PostingIter<'a>> {
        let skip = SkipTable::new(&data[header.skip_offset as usize..]);
        let skipped = (start_block as u64) * header.block_size as u64;
        debug_assert!(skipped <= header.posting_count as u64);

        let pos = if start_block < skip.len() {
            skip.block_offset(start_block)
        } else {
            header.skip_offset
        };
        if pos < header.blocks_offset || pos > header.skip_offset {
            return Err(FpIndexError::corrupt_segment("skip entry out of range"));
        }

        Ok(PostingIter {
            data,
            pos: pos as usize,
            end: header.skip_offset as usize,
            remaining: header.posting_count - skipped as u32,
            block_size: header.block_size,
            block_remaining: 0,
            cur_hash: 0,
            cur_doc: 0,
            failed: false,
        })
    }

    fn decode_next(&mut self) -> Result<(u32, u32)> {
        if self.block_remaining == 0 {
            // New block: first posting in cleartext.
            if self.pos + 8 > self.end {
                return Err(FpIndexError::corrupt_segment("truncated block header"));
            }
            self.cur_hash = LittleEndian::read_u32(&self.data[self.pos..]);
            self.cur_doc = LittleEndian::read_u32(&self.data[self.pos + 4..]);
            self.pos += 8;
            self.block_remaining = self.remaining.min(self.block_size);
        } else {
            let (hash_delta, n) = varint::decode_u32(&self.data[self.pos..self.end])?;
            self.pos += n;
            let (doc_value, n) = varint::decode_u32(&self.data[self.pos..self.end])?;
            self.pos += n;

            if hash_delta == 0 {
                self.cur_doc = self
                    .cur_doc
                    .checked_add(doc_value)
                    .ok_or_else(|| FpIndexError::corrupt_segment("doc id delta overflow"))?;
            } else {
                self.cur_hash = self
                    .cur_hash
                    .checked_add(hash_delta)
                    .ok_or_else(|| FpIndexError::corrupt_segment("hash delta overflow"))?;
                self.cur_doc = doc_value;
            }
        }

        self.block_remaining -= 1;
        self.remaining -= 1;
        Ok((self.cur_hash, self.cur_doc))
    }
}

impl<'a> Iterator for PostingIter<'a> {
    type Item = Result<(u32, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        match self.decode_next() {
            Ok(posting) => Some(Ok(posting)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_segment_bytes(postings: &[(u32, u32)], block_size: u32) -> Vec<u8> {
        let mut blocks = Vec::new();
        let mut skip = Vec::new();
        for chunk in postings.chunks(block_size as usize) {
            skip.write_u32::<LittleEndian>(chunk[0].0).unwrap();
            skip.write_u64::<LittleEndian>((HEADER_SIZE + blocks.len()) as u64)
                .unwrap();
            encode_block(chunk, &mut blocks);
        }

        let header = SegmentHeader {
            segment_id: 1,
            doc_count: 0,
            posting_count: postings.len() as u32,
            min_hash: postings.first().map_or(0, |p| p.0),
            max_hash: postings.last().map_or(0, |p| p.0),
            block_size,
            blocks_offset: HEADER_SIZE as u64,
            skip_offset: (HEADER_SIZE + blocks.len()) as u64,
            checksum: 0,
        };

        let mut data = Vec::new();
        header.write_to(&mut data).unwrap();
        data.extend_from_slice(&blocks);
        data.extend_from_slice(&skip);

        let checksum = region_checksum(&data, HEADER_SIZE as u64);
        let patched = SegmentHeader { checksum, ..header };
        let mut head = Vec::new();
        patched.write_to(&mut head).unwrap();
        data[..HEADER_SIZE].copy_from_slice(&head);
        data
    }

    fn sample_postings() -> Vec<(u32, u32)> {
        let mut postings = Vec::new();
        for hash in (0u32..50).map(|h| h * 17) {
            for doc in 0..(hash % 5 + 1) {
                postings.push((hash, doc * 3));
            }
        }
        postings.sort_unstable();
        postings
    }

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader {
            segment_id: 42,
            doc_count: 10,
            posting_count: 100,
            min_hash: 5,
            max_hash: 999,
            block_size: 16,
            blocks_offset: HEADER_SIZE as u64,
            skip_offset: HEADER_SIZE as u64 + 200,
            checksum: 0xDEADBEEF,
        };

        let postings = 100u32;
        let skip_len = block_count(postings, 16) * SKIP_ENTRY_SIZE;
        let mut data = Vec::new();
        header.write_to(&mut data).unwrap();
        data.resize(HEADER_SIZE + 200 + skip_len, 0);

        let parsed = SegmentHeader::read_from(&data).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            SegmentHeader::read_from(&data),
            Err(crate::error::FpIndexError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_header_rejects_truncation() {
        assert!(SegmentHeader::read_from(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_decode_full_stream() {
        let postings = sample_postings();
        let data = build_segment_bytes(&postings, 8);
        let header = SegmentHeader::read_from(&data).unwrap();

        let decoded: Vec<(u32, u32)> = PostingIter::new(&data, &header, 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, postings);
    }

    #[test]
    fn test_decode_preserves_duplicates() {
        let postings = vec![(7, 1), (7, 1), (7, 2), (9, 1)];
        let data = build_segment_bytes(&postings, 2);
        let header = SegmentHeader::read_from(&data).unwrap();

        let decoded: Vec<(u32, u32)> = PostingIter::new(&data, &header, 0)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, postings);
    }

    #[test]
    fn test_start_block_lookup() {
        let postings = sample_postings();
        let data = build_segment_bytes(&postings, 8);
        let header = SegmentHeader::read_from(&data).unwrap();
        let skip = SkipTable::new(&data[header.skip_offset as usize..]);

        // Every hash must be reachable from its start block.
        for &(hash, _) in &postings {
            let start = skip.start_block_for(hash);
            let found = PostingIter::new(&data, &header, start)
                .unwrap()
                .map(|p| p.unwrap())
                .any(|(h, _)| h == hash);
            assert!(found, "hash {hash} not reachable from block {start}");
        }
    }

    #[test]
    fn test_hash_spanning_blocks_found_from_start_block() {
        // One hash with enough postings to fill several blocks.
        let mut postings: Vec<(u32, u32)> = (0..20).map(|d| (100, d)).collect();
        postings.insert(0, (50, 1));
        postings.push((200, 1));

        let data = build_segment_bytes(&postings, 4);
        let header = SegmentHeader::read_from(&data).unwrap();
        let skip = SkipTable::new(&data[header.skip_offset as usize..]);

        let start = skip.start_block_for(100);
        let docs: Vec<u32> = PostingIter::new(&data, &header, start)
            .unwrap()
            .map(|p| p.unwrap())
            .filter(|&(h, _)| h == 100)
            .map(|(_, d)| d)
            .collect();
        assert_eq!(docs, (0..20).collect::<Vec<u32>>());
    }

    #[test]
    fn test_corrupt_block_detected() {
        let postings = sample_postings();
        let mut data = build_segment_bytes(&postings, 8);
        // Truncate mid-block region, keeping the skip table size plausible.
        let header = SegmentHeader::read_from(&data).unwrap();
        let cut = header.skip_offset as usize - 3;
        data.splice(cut..header.skip_offset as usize, std::iter::empty());

        // The header now disagrees with the file length.
        assert!(SegmentHeader::read_from(&data).is_err());
    }
}
