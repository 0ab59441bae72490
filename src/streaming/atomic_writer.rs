//! Atomic file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

/// An atomic writer for downloaded content.
///
/// Chunks are appended to a temporary file; `finish()` syncs it and renames
/// it over the final path. Dropping the writer without `finish()` deletes
/// the temporary file and leaves any existing destination untouched.
pub struct AtomicFileWriter {
    file: File,
    temp: NamedTempFile,
    final_path: PathBuf,
    bytes_written: u64,
}

impl AtomicFileWriter {
    /// Creates a new atomic writer targeting the specified path.
    ///
    /// Missing parent directories are created. The temporary file lives next
    /// to `final_path` so the final rename stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LocalFile` if `final_path` has no file name or the
    /// temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        if final_path.file_name().is_none() {
            return Err(local_error(&final_path, "path has no file name"));
        }

        let parent_dir = match final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        std::fs::create_dir_all(&parent_dir).map_err(|e| {
            local_error(&final_path, &format!("failed to create output directory: {}", e))
        })?;

        let temp = NamedTempFile::new_in(&parent_dir).map_err(|e| {
            local_error(&final_path, &format!("failed to create temporary file: {}", e))
        })?;

        let std_file = temp.reopen().map_err(|e| {
            local_error(&final_path, &format!("failed to reopen temporary file: {}", e))
        })?;

        Ok(Self {
            file: File::from_std(std_file),
            temp,
            final_path,
            bytes_written: 0,
        })
    }

    /// Appends a chunk.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.file.write_all(chunk).await.map_err(|e| {
            local_error(&self.final_path, &format!("error writing to file: {}", e))
        })?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes, syncs and atomically persists the file to the final path.
    ///
    /// Returns the final path on success. On error, the temporary file is
    /// cleaned up automatically.
    pub async fn finish(mut self) -> Result<PathBuf, AppError> {
        self.file.flush().await.map_err(|e| {
            local_error(&self.final_path, &format!("failed to flush output file: {}", e))
        })?;
        self.file.sync_all().await.map_err(|e| {
            local_error(&self.final_path, &format!("failed to sync output file: {}", e))
        })?;

        let Self {
            file,
            temp,
            final_path,
            ..
        } = self;
        drop(file);

        temp.persist(&final_path).map_err(|e| {
            local_error(&final_path, &format!("failed to persist file: {}", e.error))
        })?;

        Ok(final_path)
    }
}

fn local_error(path: &Path, message: &str) -> AppError {
    AppError::LocalFile {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}
