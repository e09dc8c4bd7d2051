//! File-system storage backend with memory-mapped reads.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::Result;
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Storage backend rooted at one index directory.
///
/// Inputs are memory-mapped and stay valid after the underlying file is
/// renamed over or unlinked; outputs are buffered and fsync on
/// [`StorageOutput::flush_and_sync`].
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Open a storage directory, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }

        Ok(FileStorage { base_path })
    }

    /// The directory this storage is rooted at.
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Arc<dyn StorageInput>> {
        let file = File::open(self.file_path(name))?;

        // A zero-length mapping is rejected on some platforms; an empty file
        // has no readable content either way.
        if file.metadata()?.len() == 0 {
            return Ok(Arc::new(EmptyInput));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Arc::new(MmapInput { mmap }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.file_path(name))?;

        Ok(Box::new(FileOutput {
            writer: BufWriter::new(file),
            position: 0,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        fs::remove_file(self.file_path(name))?;
        Ok(())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        fs::rename(self.file_path(old_name), self.file_path(new_name))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn sync_directory(&self) -> Result<()> {
        #[cfg(unix)]
        {
            File::open(&self.base_path)?.sync_all()?;
        }
        Ok(())
    }
}

/// A memory-mapped read-only file.
#[derive(Debug)]
struct MmapInput {
    mmap: Mmap,
}

impl StorageInput for MmapInput {
    fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

/// Stand-in for a zero-length file.
#[derive(Debug)]
struct EmptyInput;

impl StorageInput for EmptyInput {
    fn as_bytes(&self) -> &[u8] {
        &[]
    }
}

/// A buffered file writer that fsyncs on demand.
#[derive(Debug)]
struct FileOutput {
    writer: BufWriter<File>,
    position: u64,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}
