//! Collector implementations for gathering search results.
//!
//! The evaluator reports per-(document, hash) matches; a collector owns the
//! accumulation and final ranking. The stock [`TopHitsCollector`] keeps the
//! top `max_results` documents above a threshold relative to the best score.

use std::fmt::Debug;

use ahash::AHashMap;

/// One ranked search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Matching document id.
    pub doc_id: u32,
    /// Number of distinct query hashes the document shares with the query.
    pub score: u32,
}

/// Trait for accumulating per-hash match contributions.
pub trait Collector: Debug {
    /// Record that `doc_id` gains `weight` score.
    fn collect(&mut self, doc_id: u32, weight: u32);
}

/// Collects the best-scoring documents with a relative cutoff.
///
/// `top_score_percent` trims the tail: only documents scoring at least
/// `ceil(best * top_score_percent / 100)` survive finalisation. At 0 every
/// matching document qualifies (up to `max_results`); at 100 only documents
/// tied with the best do.
#[derive(Debug)]
pub struct TopHitsCollector {
    max_results: usize,
    top_score_percent: u32,
    scores: AHashMap<u32, u32>,
}

impl TopHitsCollector {
    /// Create a collector returning at most `max_results` hits.
    pub fn new(max_results: usize, top_score_percent: u32) -> Self {
        TopHitsCollector {
            max_results,
            top_score_percent,
            scores: AHashMap::new(),
        }
    }

    /// Number of distinct documents seen so far.
    pub fn collected(&self) -> usize {
        self.scores.len()
    }

    /// Rank the collected documents.
    ///
    /// Sorted by score descending, then doc id ascending, truncated to
    /// `max_results`.
    pub fn top_results(&self) -> Vec<SearchResult> {
        if self.max_results == 0 || self.scores.is_empty() {
            return Vec::new();
        }

        let best = self.scores.values().copied().max().unwrap_or(0) as u64;
        let threshold = (best * self.top_score_percent as u64).div_ceil(100);

        let mut results: Vec<SearchResult> = self
            .scores
            .iter()
            .filter(|&(_, &score)| score as u64 >= threshold)
            .map(|(&doc_id, &score)| SearchResult { doc_id, score })
            .collect();

        results.sort_unstable_by(|a, b| b.score.cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        results.truncate(self.max_results);
        results
    }
}

impl Collector for TopHitsCollector {
    fn collect(&mut self, doc_id: u32, weight: u32) {
        *self.scores.entry(doc_id).or_insert(0) += weight;
    }
}
