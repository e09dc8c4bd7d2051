//! Read access to one immutable segment.
//!
//! A reader validates the file once at open (header, region layout, CRC32)
//! and afterwards serves lock-free lookups straight off the mapped bytes.
//! Tombstone filtering is left to the caller: one reader is shared by every
//! snapshot that references the segment, and each snapshot carries its own
//! tombstone set.

use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::error::{FpIndexError, Result};
use crate::segment::format::{PostingIter, SegmentHeader, SkipTable};
use crate::segment::segment_file_name;
use crate::storage::{Storage, StorageInput};
use crate::util::bloom::BloomFilter;

/// Random-access reader over one segment file.
#[derive(Debug)]
pub struct SegmentReader {
    input: Arc<dyn StorageInput>,
    header: SegmentHeader,
    /// Sorted distinct doc ids, materialised on first use.
    doc_ids: Mutex<Option<Arc<Vec<u32>>>>,
    /// Doc-id Bloom filter; seeded at build time, else derived with the
    /// inventory.
    bloom: Mutex<Option<Arc<BloomFilter>>>,
}

impl SegmentReader {
    /// Open and validate `segment_<id>.dat`.
    pub fn open(storage: &dyn Storage, segment_id: u64) -> Result<SegmentReader> {
        let name = segment_file_name(segment_id);
        let input = storage.open_input(&name)?;
        let data = input.as_bytes();

        let header = SegmentHeader::read_from(data)?;
        if header.segment_id != segment_id {
            return Err(FpIndexError::corrupt_segment(format!(
                "{name} claims segment id {}",
                header.segment_id
            )));
        }

        let checksum = crate::segment::format::region_checksum(data, header.blocks_offset);
        if checksum != header.checksum {
            return Err(FpIndexError::corrupt_segment(format!(
                "{name} checksum mismatch: stored {:#010x}, computed {checksum:#010x}",
                header.checksum
            )));
        }

        Ok(SegmentReader {
            input,
            header,
            doc_ids: Mutex::new(None),
            bloom: Mutex::new(None),
        })
    }

    /// Install the doc-id inventory and Bloom filter computed while the
    /// segment was written, saving the first propagation probe a full scan.
    pub fn seed(&self, doc_ids: Vec<u32>, bloom: BloomFilter) {
        *self.doc_ids.lock() = Some(Arc::new(doc_ids));
        *self.bloom.lock() = Some(Arc::new(bloom));
    }

    /// The segment id this reader serves.
    pub fn segment_id(&self) -> u64 {
        self.header.segment_id
    }

    /// Total number of postings.
    pub fn posting_count(&self) -> u32 {
        self.header.posting_count
    }

    /// Number of distinct doc ids.
    pub fn doc_count(&self) -> u32 {
        self.header.doc_count
    }

    fn skip_table(&self) -> SkipTable<'_> {
        SkipTable::new(&self.input.as_bytes()[self.header.skip_offset as usize..])
    }

    /// Iterate every posting in `(hash, doc_id)` order.
    pub fn iter_postings(&self) -> Result<PostingIter<'_>> {
        PostingIter::new(self.input.as_bytes(), &self.header, 0)
    }

    /// Doc ids that carry `hash`, ascending, duplicates preserved.
    ///
    /// Tombstones are not applied here; callers filter against the snapshot's
    /// deleted set.
    pub fn postings_for(&self, hash: u32) -> Result<PostingsFor<'_>> {
        if self.header.posting_count == 0
            || hash < self.header.min_hash
            || hash > self.header.max_hash
        {
            return Ok(PostingsFor { inner: None, hash });
        }

        let start_block = self.skip_table().start_block_for(hash);
        let inner = PostingIter::new(self.input.as_bytes(), &self.header, start_block)?;
        Ok(PostingsFor {
            inner: Some(inner),
            hash,
        })
    }

    /// The sorted inventory of distinct doc ids, scanning the postings on
    /// first call and caching the result.
    pub fn doc_ids(&self) -> Result<Arc<Vec<u32>>> {
        let mut cached = self.doc_ids.lock();
        if let Some(doc_ids) = cached.as_ref() {
            return Ok(Arc::clone(doc_ids));
        }

        let mut set: AHashSet<u32> = AHashSet::with_capacity(self.header.doc_count as usize);
        for posting in self.iter_postings()? {
            let (_, doc_id) = posting?;
            set.insert(doc_id);
        }
        let mut doc_ids: Vec<u32> = set.into_iter().collect();
        doc_ids.sort_unstable();

        let doc_ids = Arc::new(doc_ids);
        *cached = Some(Arc::clone(&doc_ids));
        Ok(doc_ids)
    }

    /// Whether the segment contains postings for `doc_id`.
    ///
    /// A Bloom probe screens out most negatives; positives are confirmed
    /// against the inventory.
    pub fn contains_doc(&self, doc_id: u32) -> Result<bool> {
        let bloom = {
            let cached = self.bloom.lock();
            cached.as_ref().map(Arc::clone)
        };

        let bloom = match bloom {
            Some(bloom) => bloom,
            None => {
                let doc_ids = self.doc_ids()?;
                let bloom = Arc::new(BloomFilter::from_doc_ids(&doc_ids));
                *self.bloom.lock() = Some(Arc::clone(&bloom));
                bloom
            }
        };

        if !bloom.contains(doc_id) {
            return Ok(false);
        }
        Ok(self.doc_ids()?.binary_search(&doc_id).is_ok())
    }
}

/// Iterator over the doc ids of one hash within a segment.
#[derive(Debug)]
pub struct PostingsFor<'a> {
    inner: Option<PostingIter<'a>>,
    hash: u32,
}

impl<'a> Iterator for PostingsFor<'a> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;
        loop {
            match inner.next() {
                Some(Ok((hash, doc_id))) => {
                    if hash < self.hash {
                        continue;
                    }
                    if hash == self.hash {
                        return Some(Ok(doc_id));
                    }
                    self.inner = None;
                    return None;
                }
                Some(Err(e)) => {
                    self.inner = None;
                    return Some(Err(e));
                }
                None => {
                    self.inner = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::writer::write_segment;
    use crate::storage::MemoryStorage;

    fn build(storage: &MemoryStorage, segment_id: u64, postings: Vec<(u32, u32)>, block_size: u32) {
        write_segment(storage, segment_id, block_size, postings.into_iter().map(Ok))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_postings_for_single_hash() {
        let storage = MemoryStorage::new();
        build(&storage, 1, vec![(10, 1), (20, 2), (20, 5), (30, 9)], 2);
        let reader = SegmentReader::open(&storage, 1).unwrap();

        let docs: Vec<u32> = reader
            .postings_for(20)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs, vec![2, 5]);

        let docs: Vec<u32> = reader
            .postings_for(15)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert!(docs.is_empty());

        // Out of [min_hash, max_hash] range.
        assert_eq!(reader.postings_for(5).unwrap().count(), 0);
        assert_eq!(reader.postings_for(31).unwrap().count(), 0);
    }

    #[test]
    fn test_postings_for_hash_spanning_blocks() {
        let storage = MemoryStorage::new();
        let mut postings: Vec<(u32, u32)> = (0..30).map(|d| (7, d)).collect();
        postings.push((8, 0));
        build(&storage, 1, postings, 4);
        let reader = SegmentReader::open(&storage, 1).unwrap();

        let docs: Vec<u32> = reader
            .postings_for(7)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs, (0..30).collect::<Vec<u32>>());
    }

    #[test]
    fn test_doc_inventory_and_contains() {
        let storage = MemoryStorage::new();
        build(&storage, 1, vec![(1, 4), (2, 4), (3, 8), (9, 6)], 2);
        let reader = SegmentReader::open(&storage, 1).unwrap();

        assert_eq!(*reader.doc_ids().unwrap(), vec![4, 6, 8]);
        assert!(reader.contains_doc(4).unwrap());
        assert!(reader.contains_doc(8).unwrap());
        assert!(!reader.contains_doc(5).unwrap());
    }

    #[test]
    fn test_seeded_reader_answers_without_scan() {
        let storage = MemoryStorage::new();
        let new_segment = write_segment(&storage, 1, 2, vec![(1, 4), (2, 6)].into_iter().map(Ok))
            .unwrap()
            .unwrap();

        let reader = SegmentReader::open(&storage, 1).unwrap();
        reader.seed(new_segment.doc_ids, new_segment.bloom);

        assert!(reader.contains_doc(4).unwrap());
        assert!(!reader.contains_doc(99).unwrap());
    }

    #[test]
    fn test_open_rejects_wrong_id() {
        let storage = MemoryStorage::new();
        build(&storage, 1, vec![(1, 1)], 2);
        storage.rename_file("segment_1.dat", "segment_2.dat").unwrap();

        assert!(matches!(
            SegmentReader::open(&storage, 2),
            Err(FpIndexError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_open_rejects_corrupted_bytes() {
        let storage = MemoryStorage::new();
        build(&storage, 1, vec![(1, 1), (2, 2), (3, 3)], 2);

        // Flip a byte in the block region.
        let data = storage.open_input("segment_1.dat").unwrap();
        let mut bytes = data.as_bytes().to_vec();
        let target = crate::segment::format::HEADER_SIZE + 2;
        bytes[target] ^= 0xFF;

        use std::io::Write;
        let mut out = storage.create_output("segment_1.dat").unwrap();
        out.write_all(&bytes).unwrap();
        drop(out);

        assert!(matches!(
            SegmentReader::open(&storage, 1),
            Err(FpIndexError::CorruptSegment(_))
        ));
    }
}
