//! # Ferry Transport
//!
//! Message transports for the Ferry protocol.
//!
//! This crate provides:
//! - The [`Transport`] trait the transfer state machine is written against
//! - Length-framed transport over TCP (or any async byte stream)
//! - Colon-padded fixed-size control frames for the relay handshake
//! - A WebSocket adapter

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod framing;
pub mod stream;
pub mod transport;
pub mod websocket;

pub use stream::{StreamTransport, TcpTransport};
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use websocket::WsTransport;
