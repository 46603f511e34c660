//! Control channel messages.
//!
//! Every control message is one JSON object with a `type` discriminant,
//! carried as one data frame (or one WebSocket message).

use crate::error::{ProtocolError, Result};
use ferry_crypto::{Curve, Envelope};
use serde::{Deserialize, Serialize};

/// Release this build speaks. Peers must agree on major and minor.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Step 0: announce curve, observed address and version
    Init {
        /// PAKE curve this side will use
        curve: Curve,
        /// Our address as the relay saw it
        ip: Option<String>,
        /// Release version
        version: String,
    },
    /// Step 1: PAKE public state, base64
    Pake {
        /// Output of `Pake::to_base64`
        state: String,
    },
    /// Receiver is ready for the next step
    Ready,
    /// Step 2: sealed file metadata, carrying the key salt
    Metadata {
        /// Sealed `FileMetaData` JSON
        envelope: Envelope,
    },
    /// Step 3: sealed list of offsets the receiver already has
    BlockList {
        /// Sealed JSON array of offsets
        envelope: Envelope,
    },
    /// Step 3: number of data lanes the sender will open
    Lanes {
        /// Lane count
        count: u32,
    },
    /// Step 5: whole-file hash, hex
    Hash {
        /// BLAKE3 of the source file
        hash: String,
    },
    /// Step 5: receiver's verdict
    HashAck {
        /// File verified
        ok: bool,
    },
    /// Fatal error on the sending side of this message
    Error {
        /// Human-readable reason
        message: String,
    },
    /// Orderly shutdown
    Close,
}

impl Message {
    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()).into())
    }

    /// Parse from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` for anything that is not a
    /// known message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()).into())
    }

    /// Discriminant name, for logs and errors.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Pake { .. } => "pake",
            Self::Ready => "ready",
            Self::Metadata { .. } => "metadata",
            Self::BlockList { .. } => "block_list",
            Self::Lanes { .. } => "lanes",
            Self::Hash { .. } => "hash",
            Self::HashAck { .. } => "hash_ack",
            Self::Error { .. } => "error",
            Self::Close => "close",
        }
    }
}

/// `major.minor` of a version string.
fn major_minor(version: &str) -> Option<(&str, &str)> {
    let mut parts = version.split('.');
    Some((parts.next()?, parts.next()?))
}

/// Whether a peer running `peer` can talk to us.
#[must_use]
pub fn version_compatible(local: &str, peer: &str) -> bool {
    match (major_minor(local), major_minor(peer)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
