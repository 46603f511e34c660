//! Block codec: compress, encrypt and offset-prefix one block.
//!
//! Frame layout on a lane:
//!
//! ```text
//! encrypted:   offset (u64 BE) | nonce (24) | ciphertext + tag (>= 16)
//! plaintext:   offset (u64 BE) | payload
//! ```
//!
//! The offset is bound as associated data, so a frame cannot be replayed at
//! another position. Every real frame is at least 8 bytes long, which keeps
//! it distinct from the 5-byte [`MAGIC`] end-of-lane sentinel.

use crate::error::{FilesError, FilesResult};
use ferry_crypto::aead::{AeadKey, NONCE_SIZE, Nonce};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use rand_core::OsRng;
use std::io::{Read, Write};

/// End-of-lane sentinel.
pub const MAGIC: &[u8] = b"magic";

/// Default ceiling on an inflated block.
pub const DEFAULT_MAX_BLOCK: usize = 4 * 1024 * 1024;

const OFFSET_LEN: usize = 8;

/// Whether a lane frame is the end-of-lane sentinel.
#[must_use]
pub fn is_magic(frame: &[u8]) -> bool {
    frame == MAGIC
}

/// DEFLATE-compress a buffer.
///
/// # Errors
///
/// Returns `FilesError::Compression` if the encoder fails.
pub fn compress(data: &[u8]) -> FilesResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::fast(),
    );
    encoder
        .write_all(data)
        .map_err(|e| FilesError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| FilesError::Compression(e.to_string()))
}

/// Inflate a DEFLATE buffer, refusing output larger than `limit`.
///
/// # Errors
///
/// Returns `FilesError::Compression` on corrupt input or oversized output.
pub fn decompress(data: &[u8], limit: usize) -> FilesResult<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FilesError::Compression(e.to_string()))?;
    if out.len() > limit {
        return Err(FilesError::Compression(format!(
            "block inflates beyond {limit} bytes"
        )));
    }
    Ok(out)
}

/// Encodes and decodes lane frames for one transfer.
#[derive(Clone, Debug)]
pub struct BlockCodec {
    key: Option<AeadKey>,
    compress: bool,
    max_block: usize,
}

impl BlockCodec {
    /// Codec with optional encryption and optional compression.
    #[must_use]
    pub fn new(key: Option<AeadKey>, compress: bool) -> Self {
        Self {
            key,
            compress,
            max_block: DEFAULT_MAX_BLOCK,
        }
    }

    /// Override the inflated-block ceiling.
    #[must_use]
    pub fn with_max_block(mut self, max_block: usize) -> Self {
        self.max_block = max_block;
        self
    }

    /// Whether blocks are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Whether blocks are compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Produce the lane frame for the block at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Compression` or `FilesError::Crypto`.
    pub fn encode(&self, offset: u64, data: &[u8]) -> FilesResult<Vec<u8>> {
        let compressed;
        let payload = if self.compress {
            compressed = compress(data)?;
            &compressed[..]
        } else {
            data
        };

        let aad = offset.to_be_bytes();
        let mut frame = Vec::with_capacity(OFFSET_LEN + NONCE_SIZE + payload.len() + 16);
        frame.extend_from_slice(&aad);
        match &self.key {
            Some(key) => {
                let nonce = Nonce::generate(&mut OsRng);
                frame.extend_from_slice(nonce.as_bytes());
                frame.extend_from_slice(&key.encrypt(&nonce, payload, &aad)?);
            }
            None => frame.extend_from_slice(payload),
        }
        Ok(frame)
    }

    /// Recover `(offset, data)` from a lane frame.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Malformed` for truncated frames,
    /// `FilesError::Crypto` on authentication failure and
    /// `FilesError::Compression` on corrupt DEFLATE data.
    pub fn decode(&self, frame: &[u8]) -> FilesResult<(u64, Vec<u8>)> {
        if frame.len() < OFFSET_LEN {
            return Err(FilesError::malformed("block frame", "shorter than offset"));
        }
        let (head, body) = frame.split_at(OFFSET_LEN);
        let mut offset_bytes = [0u8; OFFSET_LEN];
        offset_bytes.copy_from_slice(head);
        let offset = u64::from_be_bytes(offset_bytes);

        let payload = match &self.key {
            Some(key) => {
                if body.len() < NONCE_SIZE {
                    return Err(FilesError::malformed("block frame", "missing nonce"));
                }
                let (nonce, ciphertext) = body.split_at(NONCE_SIZE);
                let nonce = Nonce::from_slice(nonce)
                    .ok_or_else(|| FilesError::malformed("block frame", "bad nonce"))?;
                key.decrypt(&nonce, ciphertext, head)?
            }
            None => body.to_vec(),
        };

        let data = if self.compress {
            decompress(&payload, self.max_block)?
        } else {
            payload
        };
        Ok((offset, data))
    }
}
