//! The single index writer.
//!
//! A writer buffers inserted documents in memory and turns them into one new
//! segment per commit. Commits also propagate tombstones into older segments,
//! persist the next manifest generation, publish the new snapshot, and let
//! the merge policy fold segments together. Readers never wait on any of
//! this; they keep using the snapshot they started with.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info};

use crate::error::Result;
use crate::index::manifest::{manifest_file_name, parse_manifest_file_name, Manifest};
use crate::index::{Index, Snapshot};
use crate::segment::{merge_segments, write_segment, MergeInput, SegmentReader};

/// Accumulates one transaction's changes and commits them atomically.
///
/// Created through [`crate::Session::begin`]; at most one writer exists per
/// index. Dropping a writer without committing discards its buffered state.
#[derive(Debug)]
pub struct IndexWriter {
    index: Index,
    /// Buffered documents; re-inserting a doc id replaces its hashes.
    documents: AHashMap<u32, Vec<u32>>,
    /// Attribute edits staged for the next commit.
    attributes: BTreeMap<String, String>,
}

impl IndexWriter {
    /// Claim the index's writer slot.
    pub(crate) fn new(index: Index) -> Result<IndexWriter> {
        index.acquire_writer()?;
        Ok(IndexWriter {
            index,
            documents: AHashMap::new(),
            attributes: BTreeMap::new(),
        })
    }

    /// Buffer a document. The hash multiset is kept as given; inserting the
    /// same doc id again within the transaction overwrites the earlier one.
    pub fn add_document(&mut self, doc_id: u32, hashes: &[u32]) {
        self.documents.insert(doc_id, hashes.to_vec());
    }

    /// Number of documents buffered in this transaction.
    pub fn buffered_documents(&self) -> usize {
        self.documents.len()
    }

    /// Stage an attribute write for the next commit.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    /// Read an attribute, preferring staged edits over the published value.
    pub fn attribute(&self, name: &str) -> Option<String> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        self.index
            .snapshot()
            .attribute(name)
            .map(|value| value.to_string())
    }

    /// Commit buffered documents and attribute edits as the next generation.
    ///
    /// On error the old generation stays authoritative and the buffer is
    /// kept, so the caller can retry. A commit with nothing buffered is a
    /// no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.documents.is_empty() && self.attributes.is_empty() {
            return Ok(());
        }

        let snapshot = self.index.snapshot();
        let mut manifest = snapshot.manifest().clone();
        manifest.generation += 1;

        let mut doc_ids: Vec<u32> = self.documents.keys().copied().collect();
        doc_ids.sort_unstable();

        let mut postings: Vec<(u32, u32)> = self
            .documents
            .iter()
            .flat_map(|(&doc_id, hashes)| hashes.iter().map(move |&hash| (hash, doc_id)))
            .collect();
        postings.sort_unstable();

        let mut preopened = Vec::new();
        if !postings.is_empty() {
            let segment_id = manifest.next_segment_id;
            manifest.next_segment_id += 1;

            let new_segment = write_segment(
                self.index.storage().as_ref(),
                segment_id,
                self.index.config().block_size,
                postings.into_iter().map(Ok),
            )?
            .expect("non-empty posting stream");

            propagate_deletes(&mut manifest, &snapshot, &doc_ids)?;

            let reader = SegmentReader::open(self.index.storage().as_ref(), segment_id)?;
            reader.seed(new_segment.doc_ids, new_segment.bloom);
            preopened.push(Arc::new(reader));
            manifest.add_segment(new_segment.descriptor);
        } else if !doc_ids.is_empty() {
            // Documents with no hashes: nothing to index, but they still
            // supersede older copies of the same doc ids.
            propagate_deletes(&mut manifest, &snapshot, &doc_ids)?;
        }

        for (name, value) in &self.attributes {
            manifest.attributes.insert(name.clone(), value.clone());
        }

        manifest.save(self.index.storage().as_ref())?;
        self.index.publish(manifest, &preopened)?;

        info!(
            "committed generation {} ({} documents)",
            snapshot.generation() + 1,
            self.documents.len()
        );
        self.documents.clear();
        self.attributes.clear();

        self.merge_by_policy()
    }

    /// Discard buffered documents, staged attributes, and stray temp files.
    pub fn rollback(&mut self) {
        self.documents.clear();
        self.attributes.clear();
        self.delete_temp_files();
    }

    /// Merge all live segments into one.
    ///
    /// Runs synchronously but never blocks readers: inputs are immutable and
    /// the result is published through the normal commit path.
    pub fn optimize(&mut self) -> Result<()> {
        let snapshot = self.index.snapshot();
        let segments = &snapshot.manifest().segments;

        let already_optimal =
            segments.len() <= 1 && segments.iter().all(|s| s.deleted_docs.is_empty());
        if already_optimal {
            return Ok(());
        }

        let ids: Vec<u64> = segments.iter().map(|s| s.segment_id).collect();
        self.merge(&snapshot, &ids)
    }

    /// Remove files no manifest generation references any more.
    ///
    /// Snapshots still holding unlinked segments keep working through their
    /// mappings.
    pub fn cleanup(&self) -> Result<()> {
        let snapshot = self.index.snapshot();
        let current_manifest = manifest_file_name(snapshot.generation());

        let mut removed = 0usize;
        for name in self.index.storage().list_files()? {
            let stale = if name.ends_with(".tmp") {
                true
            } else if let Some(generation) = parse_manifest_file_name(&name) {
                generation != snapshot.generation()
            } else if name.starts_with("segment_") {
                !snapshot
                    .manifest()
                    .segments
                    .iter()
                    .any(|descriptor| descriptor.file_name() == name)
            } else {
                false
            };

            if stale && name != current_manifest {
                self.index.storage().delete_file(&name)?;
                removed += 1;
            }
        }

        debug!("cleanup removed {removed} files");
        Ok(())
    }

    /// Apply the merge policy until it has nothing left to do.
    fn merge_by_policy(&mut self) -> Result<()> {
        loop {
            let snapshot = self.index.snapshot();
            let Some(candidate) = self
                .index
                .config()
                .merge_policy
                .select_merge(&snapshot.manifest().segments)
            else {
                return Ok(());
            };
            self.merge(&snapshot, &candidate.segment_ids)?;
        }
    }

    /// Merge the given segments and publish the resulting generation.
    fn merge(&mut self, snapshot: &Snapshot, segment_ids: &[u64]) -> Result<()> {
        let inputs: Vec<MergeInput<'_>> = snapshot
            .segments()
            .filter(|(descriptor, _)| segment_ids.contains(&descriptor.segment_id))
            .map(|(descriptor, reader)| MergeInput {
                reader,
                deleted: &descriptor.deleted_docs,
            })
            .collect();
        debug_assert_eq!(inputs.len(), segment_ids.len());

        let merged = merge_segments(
            self.index.storage().as_ref(),
            self.index.config().block_size,
            &inputs,
        )?;

        let mut manifest = snapshot.manifest().clone();
        manifest.generation += 1;

        let mut preopened = Vec::new();
        let output = match merged {
            Some(new_segment) => {
                let reader = SegmentReader::open(
                    self.index.storage().as_ref(),
                    new_segment.descriptor.segment_id,
                )?;
                reader.seed(new_segment.doc_ids, new_segment.bloom);
                preopened.push(Arc::new(reader));
                Some(new_segment.descriptor)
            }
            None => None,
        };
        manifest.replace_segments(segment_ids, output);

        manifest.save(self.index.storage().as_ref())?;
        self.index.publish(manifest, &preopened)?;
        Ok(())
    }

    fn delete_temp_files(&self) {
        let Ok(names) = self.index.storage().list_files() else {
            return;
        };
        for name in names {
            if name.ends_with(".tmp") {
                let _ = self.index.storage().delete_file(&name);
            }
        }
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        self.index.release_writer();
    }
}

/// Tombstone older copies of `doc_ids` in every segment of `manifest`.
///
/// Each segment's Bloom filter screens the probes; positives are confirmed
/// against the segment's doc-id inventory, so a false positive costs a scan
/// but never a wrong tombstone.
fn propagate_deletes(
    manifest: &mut Manifest,
    snapshot: &Snapshot,
    doc_ids: &[u32],
) -> Result<()> {
    debug_assert_eq!(manifest.segments.len(), snapshot.segment_count());

    for (descriptor, (_, reader)) in manifest.segments.iter_mut().zip(snapshot.segments()) {
        for &doc_id in doc_ids {
            if !descriptor.deleted_docs.contains(doc_id) && reader.contains_doc(doc_id)? {
                descriptor.deleted_docs.insert(doc_id);
            }
        }
    }
    Ok(())
}
