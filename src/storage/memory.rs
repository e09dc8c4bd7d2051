//! In-memory storage implementation for testing.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageInput, StorageOutput};

/// An in-memory storage implementation.
///
/// Useful for unit tests that exercise codecs and commit logic without
/// touching the file system. Files become visible when their output is
/// flushed or dropped, mirroring the close-then-rename discipline of the
/// file backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryStorage {
    /// Create a new, empty memory storage.
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Arc<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files.get(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {name}"))
        })?;
        Ok(Arc::new(MemoryInput {
            data: Arc::clone(data),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {name}"))
        })?;
        Ok(())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files.remove(old_name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {old_name}"))
        })?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn sync_directory(&self) -> Result<()> {
        Ok(())
    }
}

/// A read-only view of an in-memory file.
#[derive(Debug)]
struct MemoryInput {
    data: Arc<Vec<u8>>,
}

impl StorageInput for MemoryInput {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A writer that publishes its buffer into the shared file map.
#[derive(Debug)]
struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: Arc<Mutex<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryOutput {
    fn publish(&mut self) {
        self.files
            .lock()
            .insert(self.name.clone(), Arc::new(self.buffer.clone()));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.publish();
    }
}
