//! # Ferry Core
//!
//! Transfer state machine for the Ferry protocol.
//!
//! This crate provides:
//! - The control message set and the step 0-5 state machine
//! - PAKE handshake over any [`ferry_transport::Transport`]
//! - Encrypted metadata and block-list exchange
//! - Multi-lane bulk transfer with resume and whole-file verification
//! - Shared status and cooperative cancellation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Transfer (send / receive)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   control channel          │   data lanes 0..N                  │
//! │   Init, Pake, Metadata,    │   offset ‖ nonce ‖ ciphertext      │
//! │   BlockList, Lanes, Hash   │   ... then `magic`                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Connector (relay rooms, in-memory)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod connector;
pub mod error;
mod lanes;
pub mod message;
mod session;
pub mod status;
pub mod transfer;

pub use cancel::{CANCEL_GRACE, CancelToken};
pub use config::{ClientConfig, Timeouts};
pub use connector::{Connector, ControlLink, MemoryConnector, RelayConnector, WsConnector};
pub use error::{Error, HandshakeError, IntegrityError, ProtocolError, Result};
pub use message::{Message, PROTOCOL_VERSION};
pub use status::{Phase, Status, StatusSnapshot};
pub use transfer::{AcceptFn, Offer, Transfer, TransferSummary};

use std::path::Path;

/// Send `file` to whoever joins with `codephrase`, through the relay in
/// `config`.
///
/// # Errors
///
/// See [`Transfer::send`].
pub async fn send(
    file: impl AsRef<Path>,
    codephrase: &str,
    config: &ClientConfig,
) -> Result<TransferSummary> {
    Transfer::new(config.clone()).send(file, codephrase).await
}

/// Receive the file offered under `codephrase` into `config.out_dir`.
///
/// # Errors
///
/// See [`Transfer::receive`].
pub async fn receive(codephrase: &str, config: &ClientConfig) -> Result<TransferSummary> {
    Transfer::new(config.clone()).receive(codephrase).await
}
