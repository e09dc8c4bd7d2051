//! Query evaluation and result collection.

pub mod collector;
pub mod searcher;

pub use collector::{Collector, SearchResult, TopHitsCollector};
pub use searcher::Searcher;
