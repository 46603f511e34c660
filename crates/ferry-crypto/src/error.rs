//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Key confirmation failed: the peer used a different codephrase
    #[error("wrong codephrase")]
    WrongCodephrase,

    /// Both peers claimed the same PAKE role
    #[error("role collision: both peers are role {0}")]
    RoleCollision(u8),

    /// Peers selected different curves
    #[error("curve mismatch: local {local}, peer {peer}")]
    CurveMismatch {
        /// Curve selected locally
        local: String,
        /// Curve announced by the peer
        peer: String,
    },

    /// Received curve point is not a valid group element
    #[error("invalid curve point")]
    InvalidPoint,

    /// Invalid state for operation
    #[error("invalid state for operation")]
    InvalidState,

    /// Invalid message format
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Invalid parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
