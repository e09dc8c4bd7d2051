//! Client sessions.
//!
//! A session is the transactional facade over one index: begin, insert,
//! search, commit or roll back, plus maintenance and attribute access. Any
//! number of sessions may exist; the single-writer rule applies to open
//! transactions, not to sessions. `max_results` and `top_score_percent` are
//! session-local attributes and never reach the manifest.

use parking_lot::Mutex;

use crate::error::{FpIndexError, Result};
use crate::index::{Index, IndexWriter};
use crate::search::{SearchResult, Searcher, TopHitsCollector};

/// Session attribute controlling the maximum number of search results.
pub const ATTR_MAX_RESULTS: &str = "max_results";

/// Session attribute controlling the relative score cutoff (0–100).
pub const ATTR_TOP_SCORE_PERCENT: &str = "top_score_percent";

const DEFAULT_MAX_RESULTS: usize = 500;
const DEFAULT_TOP_SCORE_PERCENT: u32 = 10;

/// A client session on one index.
///
/// Methods serialise on an internal mutex, so a session can be shared across
/// threads; searches still run against immutable snapshots and never block
/// other sessions.
#[derive(Debug)]
pub struct Session {
    index: Index,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    writer: Option<IndexWriter>,
    max_results: usize,
    top_score_percent: u32,
}

impl Session {
    pub(crate) fn new(index: Index) -> Session {
        Session {
            index,
            state: Mutex::new(SessionState {
                writer: None,
                max_results: DEFAULT_MAX_RESULTS,
                top_score_percent: DEFAULT_TOP_SCORE_PERCENT,
            }),
        }
    }

    /// Open a transaction, claiming the index's single writer slot.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.writer.is_some() {
            return Err(FpIndexError::AlreadyInTransaction);
        }
        state.writer = Some(IndexWriter::new(self.index.clone())?);
        Ok(())
    }

    /// Commit the open transaction and release the writer slot.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        let writer = state.writer.as_mut().ok_or(FpIndexError::NotInTransaction)?;
        writer.commit()?;
        state.writer = None;
        Ok(())
    }

    /// Abandon the open transaction; on-disk state is untouched.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        let writer = state.writer.as_mut().ok_or(FpIndexError::NotInTransaction)?;
        writer.rollback();
        state.writer = None;
        Ok(())
    }

    /// Buffer a document in the open transaction.
    pub fn insert(&self, doc_id: u32, hashes: &[u32]) -> Result<()> {
        let mut state = self.state.lock();
        let writer = state.writer.as_mut().ok_or(FpIndexError::NotInTransaction)?;
        writer.add_document(doc_id, hashes);
        Ok(())
    }

    /// Merge all live segments into one. Requires an open transaction.
    pub fn optimize(&self) -> Result<()> {
        let mut state = self.state.lock();
        let writer = state.writer.as_mut().ok_or(FpIndexError::NotInTransaction)?;
        writer.optimize()
    }

    /// Delete files no longer referenced by the current generation.
    /// Requires an open transaction.
    pub fn cleanup(&self) -> Result<()> {
        let state = self.state.lock();
        let writer = state.writer.as_ref().ok_or(FpIndexError::NotInTransaction)?;
        writer.cleanup()
    }

    /// Rank committed documents by overlap with the query hashes.
    ///
    /// Uncommitted inserts of this session are not visible. The query runs
    /// against a snapshot taken at call time and is unaffected by concurrent
    /// commits.
    pub fn search(&self, hashes: &[u32]) -> Result<Vec<SearchResult>> {
        let (max_results, top_score_percent) = {
            let state = self.state.lock();
            (state.max_results, state.top_score_percent)
        };

        let mut collector = TopHitsCollector::new(max_results, top_score_percent);
        Searcher::new(self.index.snapshot()).search(hashes, &mut collector)?;
        Ok(collector.top_results())
    }

    /// Read an attribute.
    ///
    /// Session-local attributes come from the session; others come from the
    /// open transaction's staged edits, falling back to the published
    /// manifest. Unset attributes read as the empty string.
    pub fn get_attribute(&self, name: &str) -> Result<String> {
        let state = self.state.lock();
        match name {
            ATTR_MAX_RESULTS => Ok(state.max_results.to_string()),
            ATTR_TOP_SCORE_PERCENT => Ok(state.top_score_percent.to_string()),
            _ => {
                let value = match &state.writer {
                    Some(writer) => writer.attribute(name),
                    None => self
                        .index
                        .snapshot()
                        .attribute(name)
                        .map(|value| value.to_string()),
                };
                Ok(value.unwrap_or_default())
            }
        }
    }

    /// Write an attribute.
    ///
    /// Session-local attributes are validated and applied immediately, with
    /// or without a transaction. Anything else is staged on the open
    /// transaction and becomes visible at commit.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        match name {
            ATTR_MAX_RESULTS => {
                state.max_results = value.parse().map_err(|_| {
                    FpIndexError::invalid_attribute(format!(
                        "{ATTR_MAX_RESULTS} must be a non-negative integer, got {value:?}"
                    ))
                })?;
            }
            ATTR_TOP_SCORE_PERCENT => {
                let percent: u32 = value.parse().map_err(|_| {
                    FpIndexError::invalid_attribute(format!(
                        "{ATTR_TOP_SCORE_PERCENT} must be an integer, got {value:?}"
                    ))
                })?;
                if percent > 100 {
                    return Err(FpIndexError::invalid_attribute(format!(
                        "{ATTR_TOP_SCORE_PERCENT} must be between 0 and 100, got {percent}"
                    )));
                }
                state.top_score_percent = percent;
            }
            _ => {
                let writer = state.writer.as_mut().ok_or(FpIndexError::NotInTransaction)?;
                writer.set_attribute(name, value);
            }
        }
        Ok(())
    }
}
