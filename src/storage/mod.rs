//! Storage abstraction for index files.
//!
//! The index reads and writes its files through the [`Storage`] trait so the
//! same code paths serve the real on-disk layout and in-memory test fixtures.
//! Inputs expose a contiguous byte view (memory-mapped for files), outputs are
//! buffered writers that can be flushed and fsynced before an atomic rename.

use std::fmt::Debug;
use std::io::Write;
use std::sync::Arc;

use crate::error::Result;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// A read-only view of one stored file.
///
/// The view is immutable for the lifetime of the handle, even if the file is
/// later renamed over or unlinked. `FileStorage` backs this with an mmap, so
/// snapshot readers keep working after a segment file is replaced.
pub trait StorageInput: Send + Sync + Debug {
    /// The file contents as a contiguous byte slice.
    fn as_bytes(&self) -> &[u8];

    /// The file length in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A writer for one stored file.
pub trait StorageOutput: Write + Send + Debug {
    /// Flush buffered data and sync it to durable storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> u64;
}

/// A flat namespace of files backing one index.
pub trait Storage: Send + Sync + Debug {
    /// Open a file for random-access reading.
    fn open_input(&self, name: &str) -> Result<Arc<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Atomically rename a file, replacing any existing target.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// List all file names in the storage.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Sync the containing directory so renames survive a crash.
    fn sync_directory(&self) -> Result<()>;
}
