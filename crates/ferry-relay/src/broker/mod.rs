//! # WebSocket Channel Broker
//!
//! A rendezvous point where two peers (role 0 = sender, role 1 = receiver)
//! meet in a named channel and exchange small pieces of state: PAKE
//! messages, lane ports, the sealed file metadata and completion flags.
//!
//! - `open` creates the channel if needed and issues a per-member UUID.
//!   When both roles are present `transferReady` is set and broadcast.
//! - `update` merges the supplied fields and broadcasts the result; the
//!   caller must present a member UUID.
//! - `close`, or either member disconnecting, deletes the channel and
//!   hangs up on the other member.
//! - Channels idle for longer than the TTL are collected.
//!
//! Connecting with `?room=<token>` instead opens a [`pipe`]: two
//! connections with the same token are paired and their messages
//! forwarded to each other, so a whole transfer can run over WebSocket.

pub mod client;
pub mod pipe;
pub mod protocol;
pub mod server;

pub use client::BrokerClient;
pub use pipe::{PipeConnection, connect_pipe};
pub use protocol::{ChannelRecord, ROLE_RECEIVER, ROLE_SENDER};
pub use server::{Broker, BrokerConfig};
