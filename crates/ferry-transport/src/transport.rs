//! Transport trait abstraction for multiple transport backends.
//!
//! This module defines the core `Transport` trait: an ordered, message
//! oriented channel with `send` and `receive`. The transfer state machine is
//! written against this trait only, so it runs unchanged over a framed TCP
//! stream or a WebSocket.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// A read or connect deadline passed
    #[error("Operation timed out")]
    Timeout,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Frame exceeds the wire limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the offending frame
        size: usize,
        /// Largest frame the framing can express
        max: usize,
    },

    /// Malformed frame header or control frame
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Async message transport.
///
/// Every `send` is delivered as exactly one `receive` on the other end, in
/// order. Implementations must be safe to share between a task that sends
/// and a task that receives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    /// Returns `TransportError` if the send operation fails
    async fn send(&self, buf: &[u8]) -> TransportResult<()>;

    /// Receive the next message.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` when the peer has gone away and
    /// `TransportError::Timeout` when a configured read deadline passes.
    async fn receive(&self) -> TransportResult<Vec<u8>>;

    /// Close the transport and release resources.
    ///
    /// After calling this method, all subsequent operations should
    /// return `TransportError::Closed`.
    ///
    /// # Errors
    /// Returns `TransportError` if closing fails
    async fn close(&self) -> TransportResult<()>;

    /// Check if the transport is closed.
    fn is_closed(&self) -> bool;

    /// Remote address, when the backend knows it.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

/// Lock-free counters backing [`TransportStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
