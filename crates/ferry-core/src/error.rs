//! Error types for Ferry transfers.
//!
//! Failures are grouped by the stage that produced them so callers can
//! tell a wrong codephrase from a dead relay from a corrupted file:
//!
//! - [`HandshakeError`]: PAKE and announce failures
//! - [`ProtocolError`]: unexpected or malformed peer behaviour
//! - [`IntegrityError`]: the received file does not match what was sent
//! - everything else wraps the lower crates' errors

use ferry_crypto::CryptoError;
use ferry_files::FilesError;
use ferry_relay::RelayError;
use ferry_transport::TransportError;
use thiserror::Error;

/// Top-level transfer error
#[derive(Debug, Error)]
pub enum Error {
    /// Handshake failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Peer broke the protocol
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Received file failed verification
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    /// Relay or room failure
    #[error("relay error: {0}")]
    Room(#[from] RelayError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// File codec or disk failure
    #[error("file error: {0}")]
    Files(#[from] FilesError),

    /// Cryptographic failure outside the handshake
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Bad local configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transfer was cancelled locally
    #[error("transfer cancelled")]
    Cancelled,
}

/// Handshake-stage errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// PAKE key confirmation failed on this side or the peer's
    #[error("wrong codephrase")]
    WrongCodephrase,

    /// Peers picked different curves
    #[error("curve mismatch: we use {local}, peer uses {peer}")]
    CurveMismatch {
        /// Our curve
        local: String,
        /// Peer's curve
        peer: String,
    },

    /// Both peers claimed the same role
    #[error("both peers hold role {0}")]
    RoleCollision(u8),

    /// Other PAKE failure
    #[error("{0}")]
    Pake(CryptoError),
}

/// Peer misbehaviour
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message arrived out of order
    #[error("expected {expected}, got {got}")]
    UnexpectedMessage {
        /// Message type we waited for
        expected: &'static str,
        /// Message type that arrived
        got: String,
    },

    /// Peer runs an incompatible release
    #[error("incompatible version: we run {local}, peer runs {peer}")]
    IncompatibleVersion {
        /// Our version
        local: String,
        /// Peer's version
        peer: String,
    },

    /// Message could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Peer reported an error
    #[error("peer error: {0}")]
    PeerError(String),

    /// Receiver declined the file
    #[error("transfer refused by receiver")]
    Refused,

    /// Peer ended the session early
    #[error("peer closed the session")]
    PeerClosed,

    /// Peer went silent
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Integrity failures
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Whole-file hash differs
    #[error("hash mismatch")]
    HashMismatch,

    /// Bytes on disk differ from the announced size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Announced size
        expected: u64,
        /// Bytes accounted for
        actual: u64,
    },
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WrongCodephrase => HandshakeError::WrongCodephrase.into(),
            CryptoError::RoleCollision(role) => HandshakeError::RoleCollision(role).into(),
            CryptoError::CurveMismatch { local, peer } => {
                HandshakeError::CurveMismatch { local, peer }.into()
            }
            other => Self::Crypto(other),
        }
    }
}

/// Result alias for transfer operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this failure means the received bytes cannot be trusted.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Whether the error is a wrong codephrase on either side.
    #[must_use]
    pub fn is_wrong_codephrase(&self) -> bool {
        matches!(self, Self::Handshake(HandshakeError::WrongCodephrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_errors_map_to_handshake() {
        let err: Error = CryptoError::WrongCodephrase.into();
        assert!(err.is_wrong_codephrase());
        assert_eq!(err.to_string(), "handshake failed: wrong codephrase");

        let err: Error = CryptoError::RoleCollision(1).into();
        assert!(matches!(
            err,
            Error::Handshake(HandshakeError::RoleCollision(1))
        ));

        let err: Error = CryptoError::DecryptionFailed.into();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn test_integrity_classification() {
        let err: Error = IntegrityError::SizeMismatch {
            expected: 13,
            actual: 12,
        }
        .into();
        assert!(err.is_integrity());
        assert!(!Error::Cancelled.is_integrity());
    }
}
