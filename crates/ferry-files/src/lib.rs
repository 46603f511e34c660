//! # Ferry Files
//!
//! Chunked file codec for the Ferry protocol.
//!
//! This crate provides:
//! - File metadata exchanged (encrypted) before the bulk phase
//! - Fixed-size block planning and contiguous lane partitioning
//! - Per-block DEFLATE compression and `XChaCha20-Poly1305` encryption
//! - Positional block I/O so lanes can write out of order
//! - A sidecar progress log for resuming interrupted transfers
//! - Whole-file BLAKE3 hashing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blockfile;
pub mod chunker;
pub mod codec;
pub mod error;
pub mod hasher;
pub mod sidecar;

pub use blockfile::BlockFile;
pub use chunker::{BlockPlan, BlockSkipList, partition};
pub use codec::{BlockCodec, MAGIC, is_magic};
pub use error::{FilesError, FilesResult};
pub use sidecar::Sidecar;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Block size on raw TCP lanes (32 KiB)
pub const TCP_BLOCK_SIZE: u32 = 32 * 1024;

/// Block size when frames travel as WebSocket messages (16 KiB)
pub const WS_BLOCK_SIZE: u32 = 16 * 1024;

/// Metadata describing the file on offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// Source file name
    pub name: String,
    /// Name the receiver should save under
    pub sent_name: String,
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 hash of the whole file, hex
    pub hash: String,
    /// Modification time, seconds since the Unix epoch
    pub mod_time: u64,
    /// Directory flag (always false; directories are not transferred)
    pub is_dir: bool,
    /// Blocks are DEFLATE-compressed
    pub is_compressed: bool,
    /// Blocks are encrypted
    pub is_encrypted: bool,
    /// Block size used by the sender
    pub block_size: u32,
}

impl FileMetaData {
    /// Describe the regular file at `path`, hashing its contents.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotAFile` for directories and other non-regular
    /// files, or `FilesError::Io` if the file cannot be read.
    pub async fn from_path(
        path: impl AsRef<Path>,
        block_size: u32,
        compress: bool,
        encrypt: bool,
    ) -> FilesResult<Self> {
        let path = path.as_ref();
        let stat = tokio::fs::metadata(path).await?;
        if !stat.is_file() {
            return Err(FilesError::NotAFile(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FilesError::NotAFile(path.display().to_string()))?;
        let mod_time = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let hash = hex::encode(hasher::hash_file(path).await?);

        Ok(Self {
            sent_name: name.clone(),
            name,
            size: stat.len(),
            hash,
            mod_time,
            is_dir: false,
            is_compressed: compress,
            is_encrypted: encrypt,
            block_size,
        })
    }

    /// Block layout for this file.
    #[must_use]
    pub fn plan(&self) -> BlockPlan {
        BlockPlan::new(self.size, self.block_size.max(1))
    }

    /// Decoded content hash.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Malformed` if the hash is not 32 bytes of hex.
    pub fn hash_bytes(&self) -> FilesResult<[u8; 32]> {
        let bytes = hex::decode(&self.hash).map_err(|e| FilesError::malformed("file hash", e))?;
        bytes
            .try_into()
            .map_err(|_| FilesError::malformed("file hash", "expected 32 bytes"))
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Malformed` if serialization fails.
    pub fn to_bytes(&self) -> FilesResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FilesError::malformed("file metadata", e))
    }

    /// Parse from JSON and check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Malformed` for bad JSON, a zero block size or a
    /// bad hash, and `FilesError::UnsafeName` for an unusable file name.
    pub fn from_bytes(bytes: &[u8]) -> FilesResult<Self> {
        let meta: Self =
            serde_json::from_slice(bytes).map_err(|e| FilesError::malformed("file metadata", e))?;
        if meta.block_size == 0 {
            return Err(FilesError::malformed("file metadata", "zero block size"));
        }
        meta.hash_bytes()?;
        safe_file_name(&meta.sent_name)?;
        Ok(meta)
    }
}

/// Accept only a plain file name: no separators, no `..`, not empty.
///
/// # Errors
///
/// Returns `FilesError::UnsafeName` otherwise.
pub fn safe_file_name(name: &str) -> FilesResult<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(FilesError::UnsafeName(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"Hello World!\n").unwrap();

        let meta = FileMetaData::from_path(&path, TCP_BLOCK_SIZE, true, true)
            .await
            .unwrap();
        assert_eq!(meta.name, "hello.txt");
        assert_eq!(meta.sent_name, "hello.txt");
        assert_eq!(meta.size, 13);
        assert_eq!(meta.hash_bytes().unwrap(), hasher::hash_bytes(b"Hello World!\n"));
        assert!(meta.mod_time > 0);
        assert!(!meta.is_dir);
        assert_eq!(meta.plan().block_count(), 1);

        let parsed = FileMetaData::from_bytes(&meta.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[tokio::test]
    async fn test_metadata_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileMetaData::from_path(dir.path(), TCP_BLOCK_SIZE, true, true).await,
            Err(FilesError::NotAFile(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_path_traversal() {
        let meta = FileMetaData {
            name: "x".into(),
            sent_name: "../../etc/passwd".into(),
            size: 1,
            hash: "00".repeat(32),
            mod_time: 0,
            is_dir: false,
            is_compressed: false,
            is_encrypted: true,
            block_size: 1024,
        };
        let bytes = serde_json::to_vec(&meta).unwrap();
        assert!(matches!(
            FileMetaData::from_bytes(&bytes),
            Err(FilesError::UnsafeName(_))
        ));
    }

    #[test]
    fn test_safe_file_name() {
        assert!(safe_file_name("report.pdf").is_ok());
        assert!(safe_file_name("").is_err());
        assert!(safe_file_name("..").is_err());
        assert!(safe_file_name("a/b").is_err());
        assert!(safe_file_name("a\\b").is_err());
    }
}
