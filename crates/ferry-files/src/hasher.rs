//! Whole-file BLAKE3 hashing for integrity confirmation.

use crate::error::{FilesError, FilesResult};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Hash a file's contents, streaming it from disk.
///
/// # Errors
///
/// Returns `FilesError::Io` if the file cannot be read.
pub async fn hash_file(path: impl AsRef<Path>) -> FilesResult<[u8; 32]> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(|e| FilesError::Io(std::io::Error::other(e)))?
}

/// Blocking variant of [`hash_file`].
///
/// # Errors
///
/// Returns `FilesError::Io` if the file cannot be read.
pub fn hash_file_blocking(path: &Path) -> FilesResult<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Hash an in-memory buffer.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
