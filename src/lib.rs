//! # fpindex
//!
//! A persistent, transactional inverted index for 32-bit audio-fingerprint
//! hashes. Documents are bags of hashes keyed by a numeric id; queries rank
//! documents by how many distinct hashes they share with the query.
//!
//! ## Features
//!
//! - Immutable, block-compressed segment files with skip tables
//! - Atomic, generation-numbered manifest commits
//! - Snapshot isolation: readers never block on the single writer
//! - Deletion by overwrite, propagated as manifest tombstones
//! - Geometric segment merging with an explicit optimize path
//!
//! ## Example
//!
//! ```no_run
//! use fpindex::Index;
//!
//! # fn main() -> fpindex::Result<()> {
//! let index = Index::open("/tmp/fingerprints")?;
//! let session = index.begin_session();
//!
//! session.begin()?;
//! session.insert(1, &[100, 200, 300])?;
//! session.commit()?;
//!
//! for hit in session.search(&[100, 300])? {
//!     println!("doc {} scored {}", hit.doc_id, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod search;
pub mod segment;
pub mod session;
pub mod storage;
pub mod util;

pub use error::{FpIndexError, Result};
pub use index::{Index, IndexConfig, IndexWriter, Snapshot};
pub use search::{Collector, SearchResult, Searcher, TopHitsCollector};
pub use session::Session;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
