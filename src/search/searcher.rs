//! Query evaluation over a snapshot.
//!
//! The evaluator walks posting lists; the collector decides ranking. For each
//! distinct query hash, segments are consulted newest first, tombstoned doc
//! ids are filtered against the snapshot's deleted sets, and each surviving
//! document contributes one unit of score per matching hash. A live doc id is
//! owned by exactly one segment, so no cross-segment deduplication is needed.

use std::sync::Arc;

use crate::error::Result;
use crate::index::Snapshot;
use crate::search::collector::Collector;

/// Evaluates hash-bag queries against one snapshot.
#[derive(Debug)]
pub struct Searcher {
    snapshot: Arc<Snapshot>,
}

impl Searcher {
    /// Create a searcher over a snapshot.
    pub fn new(snapshot: Arc<Snapshot>) -> Searcher {
        Searcher { snapshot }
    }

    /// The snapshot this searcher evaluates against.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Feed every `(document, query hash)` match to the collector.
    ///
    /// Hash multiplicity is collapsed on both sides: a duplicated hash in the
    /// query or in a document contributes a single unit. Errors abort the
    /// search without partial results reaching the caller.
    pub fn search(&self, hashes: &[u32], collector: &mut dyn Collector) -> Result<()> {
        if hashes.is_empty() || self.snapshot.is_empty() {
            return Ok(());
        }

        let mut unique: Vec<u32> = hashes.to_vec();
        unique.sort_unstable();
        unique.dedup();

        for &hash in &unique {
            for (descriptor, reader) in self.snapshot.segments_newest_first() {
                let mut previous: Option<u32> = None;
                for doc_id in reader.postings_for(hash)? {
                    let doc_id = doc_id?;
                    if previous == Some(doc_id) || descriptor.deleted_docs.contains(doc_id) {
                        continue;
                    }
                    previous = Some(doc_id);
                    collector.collect(doc_id, 1);
                }
            }
        }
        Ok(())
    }
}
