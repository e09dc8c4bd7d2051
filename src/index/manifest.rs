//! The index manifest.
//!
//! A manifest is one generation's authoritative listing of live segments,
//! their tombstones, and the index-level attribute map. On disk it is a small
//! little-endian binary file named `info_<generation>`; commits replace it
//! atomically (write temp, fsync, rename, sync directory) so the on-disk
//! state is always entirely one generation.

use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::{FpIndexError, Result};
use crate::segment::{DeletedDocs, SegmentDescriptor};
use crate::storage::Storage;

/// Magic number at the start of every manifest file (`AIDX`).
pub const MANIFEST_MAGIC: u32 = u32::from_le_bytes(*b"AIDX");

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 2;

/// File name of the manifest for a generation.
pub fn manifest_file_name(generation: u64) -> String {
    format!("info_{generation}")
}

/// Parse a generation number out of a manifest file name.
pub fn parse_manifest_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("info_")?.parse().ok()
}

/// One generation of index metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Monotone generation number; each commit produces the next one.
    pub generation: u64,
    /// Id the next created segment will receive.
    pub next_segment_id: u64,
    /// Index-level attributes.
    pub attributes: BTreeMap<String, String>,
    /// Live segments, ascending by segment id.
    pub segments: Vec<SegmentDescriptor>,
}

impl Manifest {
    /// The empty generation-zero manifest of a fresh index.
    pub fn new() -> Self {
        Manifest {
            generation: 0,
            next_segment_id: 1,
            attributes: BTreeMap::new(),
            segments: Vec::new(),
        }
    }

    /// Look up a segment descriptor by id.
    pub fn segment(&self, segment_id: u64) -> Option<&SegmentDescriptor> {
        self.segments
            .iter()
            .find(|descriptor| descriptor.segment_id == segment_id)
    }

    /// Append a segment, keeping the list ordered by id.
    pub fn add_segment(&mut self, descriptor: SegmentDescriptor) {
        let pos = self
            .segments
            .partition_point(|existing| existing.segment_id < descriptor.segment_id);
        self.segments.insert(pos, descriptor);
    }

    /// Replace the segments with the given ids by one merged descriptor.
    pub fn replace_segments(&mut self, merged_ids: &[u64], output: Option<SegmentDescriptor>) {
        self.segments
            .retain(|descriptor| !merged_ids.contains(&descriptor.segment_id));
        if let Some(descriptor) = output {
            self.add_segment(descriptor);
        }
    }

    /// Serialise to the on-disk format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MANIFEST_MAGIC.to_le_bytes());
        out.extend_from_slice(&MANIFEST_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&self.next_segment_id.to_le_bytes());

        out.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        for (name, value) in &self.attributes {
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value.as_bytes());
        }

        out.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for descriptor in &self.segments {
            out.extend_from_slice(&descriptor.segment_id.to_le_bytes());
            out.extend_from_slice(&descriptor.doc_count.to_le_bytes());
            out.extend_from_slice(&descriptor.posting_count.to_le_bytes());
            out.extend_from_slice(&descriptor.min_hash.to_le_bytes());
            out.extend_from_slice(&descriptor.max_hash.to_le_bytes());
            out.extend_from_slice(&(descriptor.deleted_docs.len() as u32).to_le_bytes());
            for &doc_id in descriptor.deleted_docs.as_slice() {
                out.extend_from_slice(&doc_id.to_le_bytes());
            }
        }

        out
    }

    /// Parse the on-disk format.
    pub fn decode(data: &[u8]) -> Result<Manifest> {
        let mut cursor = Cursor { data, pos: 0 };

        let magic = cursor.read_u32()?;
        if magic != MANIFEST_MAGIC {
            return Err(FpIndexError::corrupt_manifest(format!(
                "bad magic: {magic:#010x}"
            )));
        }
        let version = cursor.read_u32()?;
        if version != MANIFEST_FORMAT_VERSION {
            return Err(FpIndexError::corrupt_manifest(format!(
                "unsupported format version: {version}"
            )));
        }

        let generation = cursor.read_u64()?;
        let next_segment_id = cursor.read_u64()?;

        let attribute_count = cursor.read_u32()?;
        let mut attributes = BTreeMap::new();
        for _ in 0..attribute_count {
            let name_len = cursor.read_u16()? as usize;
            let name = cursor.read_string(name_len)?;
            let value_len = cursor.read_u32()? as usize;
            let value = cursor.read_string(value_len)?;
            attributes.insert(name, value);
        }

        let segment_count = cursor.read_u32()?;
        let mut segments: Vec<SegmentDescriptor> = Vec::with_capacity(segment_count as usize);
        for _ in 0..segment_count {
            let segment_id = cursor.read_u64()?;
            let doc_count = cursor.read_u32()?;
            let posting_count = cursor.read_u32()?;
            let min_hash = cursor.read_u32()?;
            let max_hash = cursor.read_u32()?;

            let deleted_count = cursor.read_u32()?;
            let mut deleted = Vec::with_capacity(deleted_count as usize);
            for _ in 0..deleted_count {
                deleted.push(cursor.read_u32()?);
            }
            let deleted_docs = DeletedDocs::from_sorted(deleted).ok_or_else(|| {
                FpIndexError::corrupt_manifest(format!(
                    "segment {segment_id}: tombstones not sorted"
                ))
            })?;

            if let Some(last) = segments.last() {
                if last.segment_id >= segment_id {
                    return Err(FpIndexError::corrupt_manifest(
                        "segments not ordered by id",
                    ));
                }
            }
            segments.push(SegmentDescriptor {
                segment_id,
                doc_count,
                posting_count,
                min_hash,
                max_hash,
                deleted_docs,
            });
        }

        if cursor.pos != data.len() {
            return Err(FpIndexError::corrupt_manifest("trailing bytes"));
        }

        Ok(Manifest {
            generation,
            next_segment_id,
            attributes,
            segments,
        })
    }

    /// Atomically persist this manifest as `info_<generation>`.
    ///
    /// Follows the commit procedure: temp file, fsync, rename, directory
    /// sync. If anything fails before the rename completes, the previous
    /// generation stays authoritative.
    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let file_name = manifest_file_name(self.generation);
        let temp_name = format!("{file_name}.tmp");

        let mut output = storage.create_output(&temp_name)?;
        output.write_all(&self.encode())?;
        output.flush_and_sync()?;
        drop(output);

        storage.rename_file(&temp_name, &file_name)?;
        storage.sync_directory()?;

        debug!(
            "saved {file_name}: {} segments, {} attributes",
            self.segments.len(),
            self.attributes.len()
        );
        Ok(())
    }

    /// Load the highest-generation manifest in the storage, if any.
    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Manifest>> {
        let mut latest: Option<u64> = None;
        for name in storage.list_files()? {
            if let Some(generation) = parse_manifest_file_name(&name) {
                latest = Some(latest.map_or(generation, |current| current.max(generation)));
            }
        }

        let Some(generation) = latest else {
            return Ok(None);
        };

        let input = storage.open_input(&manifest_file_name(generation))?;
        let manifest = Manifest::decode(input.as_bytes())?;
        if manifest.generation != generation {
            return Err(FpIndexError::corrupt_manifest(format!(
                "file info_{generation} contains generation {}",
                manifest.generation
            )));
        }
        Ok(Some(manifest))
    }

    /// Best-effort removal of manifest files older than `keep_from`.
    pub fn prune_older_than(storage: &dyn Storage, keep_from: u64) {
        let Ok(names) = storage.list_files() else {
            return;
        };
        for name in names {
            if let Some(generation) = parse_manifest_file_name(&name) {
                if generation < keep_from {
                    let _ = storage.delete_file(&name);
                }
            }
        }
    }
}

/// Bounds-checked little-endian reads over the manifest bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| FpIndexError::corrupt_manifest("unexpected end of file"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FpIndexError::corrupt_manifest("attribute is not valid UTF-8"))
    }
}
