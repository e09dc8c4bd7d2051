//! Immutable point-in-time views of the index.
//!
//! A snapshot pairs one manifest generation with an open reader per live
//! segment. Handles are reference counted: queries hold a snapshot for their
//! whole lifetime and are unaffected by later commits, merges, or cleanups —
//! the mapped segment bytes stay valid even after the files are renamed over
//! or unlinked.

use std::sync::Arc;

use crate::index::manifest::Manifest;
use crate::segment::{SegmentDescriptor, SegmentReader};

/// A stable view of one index generation.
#[derive(Debug)]
pub struct Snapshot {
    manifest: Arc<Manifest>,
    /// Open readers, parallel to `manifest.segments`.
    readers: Vec<Arc<SegmentReader>>,
}

impl Snapshot {
    pub(crate) fn new(manifest: Arc<Manifest>, readers: Vec<Arc<SegmentReader>>) -> Snapshot {
        debug_assert_eq!(manifest.segments.len(), readers.len());
        Snapshot { manifest, readers }
    }

    /// The generation this snapshot observes.
    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    /// The manifest backing this snapshot.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.readers.len()
    }

    /// Whether the snapshot has no live segments.
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Live segments with their readers, ascending by segment id.
    pub fn segments(
        &self,
    ) -> impl DoubleEndedIterator<Item = (&SegmentDescriptor, &Arc<SegmentReader>)> {
        self.manifest.segments.iter().zip(self.readers.iter())
    }

    /// Live segments newest first, the order queries consult them in.
    pub fn segments_newest_first(
        &self,
    ) -> impl Iterator<Item = (&SegmentDescriptor, &Arc<SegmentReader>)> {
        self.segments().rev()
    }

    /// Value of an index attribute, if set.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.manifest.attributes.get(name).map(String::as_str)
    }

    /// Find a reader whose on-disk content matches `descriptor`, for reuse
    /// when publishing the next generation.
    pub(crate) fn reader_for(&self, descriptor: &SegmentDescriptor) -> Option<Arc<SegmentReader>> {
        self.manifest
            .segments
            .iter()
            .position(|existing| existing.same_content(descriptor))
            .map(|pos| Arc::clone(&self.readers[pos]))
    }
}
