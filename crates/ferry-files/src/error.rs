//! File codec error types.

use ferry_crypto::CryptoError;
use thiserror::Error;

/// Errors from block coding and file I/O
#[derive(Debug, Error)]
pub enum FilesError {
    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Block encryption or decryption failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// DEFLATE stream could not be produced or inflated
    #[error("compression error: {0}")]
    Compression(String),

    /// Frame, metadata or sidecar content is malformed
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// What was being parsed
        what: &'static str,
        /// Parser detail
        detail: String,
    },

    /// Path is not a regular file
    #[error("not a regular file: {0}")]
    NotAFile(String),

    /// File name cannot be used as a destination
    #[error("unsafe file name: {0:?}")]
    UnsafeName(String),

    /// Block offset outside the file or not block aligned
    #[error("block offset {offset} invalid for file of {size} bytes")]
    BadOffset {
        /// Offending offset
        offset: u64,
        /// File size
        size: u64,
    },
}

impl FilesError {
    pub(crate) fn malformed(what: &'static str, detail: impl ToString) -> Self {
        Self::Malformed {
            what,
            detail: detail.to_string(),
        }
    }
}

/// Result alias for this crate
pub type FilesResult<T> = Result<T, FilesError>;
