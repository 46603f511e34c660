//! Positional block reads and writes.
//!
//! Lanes write disjoint offset ranges of the same destination, so writes
//! are positional (`pwrite`) on a shared handle and need no file lock.
//! The blocking syscalls run on tokio's blocking pool.

use crate::error::{FilesError, FilesResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle for positional I/O on one file.
#[derive(Clone, Debug)]
pub struct BlockFile {
    file: Arc<File>,
    path: PathBuf,
}

impl BlockFile {
    /// Open an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the file cannot be opened.
    pub async fn open_read(path: impl AsRef<Path>) -> FilesResult<Self> {
        let path = path.as_ref().to_path_buf();
        let p = path.clone();
        let file = tokio::task::spawn_blocking(move || File::open(p))
            .await
            .map_err(join_error)??;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Open (creating if needed, never truncating) a destination and size
    /// it to `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the file cannot be opened or resized.
    pub async fn open_write(path: impl AsRef<Path>, size: u64) -> FilesResult<Self> {
        let path = path.as_ref().to_path_buf();
        let p = path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&p)?;
            file.set_len(size)?;
            Ok(file)
        })
        .await
        .map_err(join_error)??;
        Ok(Self {
            file: Arc::new(file),
            path,
        })
    }

    /// Path this handle was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io`, including `UnexpectedEof` past the end.
    pub async fn read_at(&self, offset: u64, len: usize) -> FilesResult<Vec<u8>> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> FilesResult<Vec<u8>> {
            let mut buf = vec![0u8; len];
            read_exact_at(&file, &mut buf, offset)?;
            Ok(buf)
        })
        .await
        .map_err(join_error)?
    }

    /// Write all of `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the write fails.
    pub async fn write_at(&self, offset: u64, data: Vec<u8>) -> FilesResult<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(join_error)?
            .map_err(FilesError::from)
    }

    /// Flush file data to disk.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if syncing fails.
    pub async fn sync(&self) -> FilesResult<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(join_error)?
            .map_err(FilesError::from)
    }
}

fn join_error(e: tokio::task::JoinError) -> FilesError {
    FilesError::Io(std::io::Error::other(e))
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_out_of_order_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let file = BlockFile::open_write(&path, 12).await.unwrap();
        file.write_at(8, b"IJKL".to_vec()).await.unwrap();
        file.write_at(0, b"ABCD".to_vec()).await.unwrap();
        file.write_at(4, b"EFGH".to_vec()).await.unwrap();
        file.sync().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"ABCDEFGHIJKL");
        assert_eq!(file.read_at(4, 4).await.unwrap(), b"EFGH");
    }

    #[tokio::test]
    async fn test_open_write_keeps_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        std::fs::write(&path, b"keep").unwrap();

        let file = BlockFile::open_write(&path, 8).await.unwrap();
        assert_eq!(file.read_at(0, 4).await.unwrap(), b"keep");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let file = BlockFile::open_read(&path).await.unwrap();
        assert!(file.read_at(0, 10).await.is_err());
    }
}
