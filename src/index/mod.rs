//! Index core: manifest, snapshots, writer, and merge policy.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{FpIndexError, Result};
use crate::segment::{SegmentDescriptor, SegmentReader, DEFAULT_BLOCK_SIZE};
use crate::session::Session;
use crate::storage::{FileStorage, Storage};

pub mod manifest;
pub mod merge_policy;
pub mod snapshot;
pub mod writer;

pub use manifest::Manifest;
pub use merge_policy::{GeometricMergePolicy, MergeCandidate, MergePolicy, NoMergePolicy};
pub use snapshot::Snapshot;
pub use writer::IndexWriter;

/// Tuning knobs for an index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Postings per compressed block and skip entry in new segments.
    pub block_size: u32,
    /// Policy driving post-commit merges.
    pub merge_policy: Arc<dyn MergePolicy>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            merge_policy: Arc::new(GeometricMergePolicy::default()),
        }
    }
}

/// A persistent inverted index over 32-bit fingerprint hashes.
///
/// The index publishes an immutable [`Snapshot`] per committed generation.
/// Any number of readers run against snapshots concurrently; at most one
/// writer exists at a time, created through [`Session::begin`].
#[derive(Debug, Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

#[derive(Debug)]
struct IndexInner {
    storage: Arc<dyn Storage>,
    config: IndexConfig,
    /// The published snapshot; swapped only by the writer after a commit.
    current: RwLock<Arc<Snapshot>>,
    /// Gate for writer creation; `true` while a writer exists.
    writer_active: Mutex<bool>,
}

impl Index {
    /// Open (or create) an index in a directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Index> {
        Index::open_with_config(Arc::new(FileStorage::open(path)?), IndexConfig::default())
    }

    /// Open (or create) an index over any storage with default config.
    pub fn open_with_storage(storage: Arc<dyn Storage>) -> Result<Index> {
        Index::open_with_config(storage, IndexConfig::default())
    }

    /// Open (or create) an index over any storage.
    pub fn open_with_config(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Index> {
        let manifest = match Manifest::load_latest(storage.as_ref())? {
            Some(manifest) => manifest,
            None => {
                // Fresh directory: persist the empty generation so a
                // concurrent or later open sees a valid index.
                let manifest = Manifest::new();
                manifest.save(storage.as_ref())?;
                manifest
            }
        };

        info!(
            "opened index at generation {} with {} segments",
            manifest.generation,
            manifest.segments.len()
        );

        let snapshot = open_snapshot(storage.as_ref(), manifest, None, &[])?;
        Ok(Index {
            inner: Arc::new(IndexInner {
                storage,
                config,
                current: RwLock::new(Arc::new(snapshot)),
                writer_active: Mutex::new(false),
            }),
        })
    }

    /// The current published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.current.read())
    }

    /// Create a session bound to this index.
    ///
    /// Sessions are cheap; the single-writer constraint applies to
    /// transactions ([`Session::begin`]), not to sessions.
    pub fn begin_session(&self) -> Session {
        Session::new(self.clone())
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub(crate) fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Claim the writer slot, failing if one is already active.
    pub(crate) fn acquire_writer(&self) -> Result<()> {
        let mut active = self.inner.writer_active.lock();
        if *active {
            return Err(FpIndexError::AlreadyInTransaction);
        }
        *active = true;
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        *self.inner.writer_active.lock() = false;
    }

    /// Publish a committed manifest as the new current snapshot.
    ///
    /// `preopened` readers (freshly written segments, seeded with their doc
    /// inventory) take precedence; unchanged segments keep the readers of
    /// the outgoing snapshot; anything else is opened from storage.
    pub(crate) fn publish(
        &self,
        manifest: Manifest,
        preopened: &[Arc<SegmentReader>],
    ) -> Result<Arc<Snapshot>> {
        let previous = self.snapshot();
        let snapshot = Arc::new(open_snapshot(
            self.inner.storage.as_ref(),
            manifest,
            Some(&previous),
            preopened,
        )?);

        *self.inner.current.write() = Arc::clone(&snapshot);
        debug!("published generation {}", snapshot.generation());

        // Best-effort: older manifests are only useful as a manual fallback,
        // so keep the previous generation and drop the rest.
        Manifest::prune_older_than(
            self.inner.storage.as_ref(),
            snapshot.generation().saturating_sub(1),
        );
        Ok(snapshot)
    }
}

/// Build a snapshot for `manifest`, opening or reusing one reader per segment.
fn open_snapshot(
    storage: &dyn Storage,
    manifest: Manifest,
    previous: Option<&Snapshot>,
    preopened: &[Arc<SegmentReader>],
) -> Result<Snapshot> {
    let mut readers = Vec::with_capacity(manifest.segments.len());
    for descriptor in &manifest.segments {
        readers.push(open_reader(storage, descriptor, previous, preopened)?);
    }
    Ok(Snapshot::new(Arc::new(manifest), readers))
}

fn open_reader(
    storage: &dyn Storage,
    descriptor: &SegmentDescriptor,
    previous: Option<&Snapshot>,
    preopened: &[Arc<SegmentReader>],
) -> Result<Arc<SegmentReader>> {
    for reader in preopened {
        if reader.segment_id() == descriptor.segment_id
            && reader.posting_count() == descriptor.posting_count
            && reader.doc_count() == descriptor.doc_count
        {
            return Ok(Arc::clone(reader));
        }
    }
    if let Some(reader) = previous.and_then(|snapshot| snapshot.reader_for(descriptor)) {
        return Ok(reader);
    }
    Ok(Arc::new(SegmentReader::open(storage, descriptor.segment_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_open_fresh_index() {
        let storage = Arc::new(MemoryStorage::new());
        let index = Index::open_with_storage(storage.clone()).unwrap();

        let snapshot = index.snapshot();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.is_empty());
        assert!(storage.file_exists("info_0"));
    }

    #[test]
    fn test_reopen_sees_same_generation() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let index = Index::open_with_storage(storage.clone()).unwrap();
            assert_eq!(index.snapshot().generation(), 0);
        }
        let index = Index::open_with_storage(storage).unwrap();
        assert_eq!(index.snapshot().generation(), 0);
    }

    #[test]
    fn test_writer_slot_is_exclusive() {
        let storage = Arc::new(MemoryStorage::new());
        let index = Index::open_with_storage(storage).unwrap();

        index.acquire_writer().unwrap();
        assert!(matches!(
            index.acquire_writer(),
            Err(FpIndexError::AlreadyInTransaction)
        ));

        index.release_writer();
        index.acquire_writer().unwrap();
        index.release_writer();
    }
}
