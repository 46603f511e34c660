//! Length-framed transport over any async byte stream.
//!
//! The stream is split into independent read and write halves, each behind
//! its own lock, so one task can block in `receive` while another sends.

use crate::framing::{read_frame, write_frame};
use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Framed transport over a generic stream.
pub struct StreamTransport<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    read_timeout: Option<Duration>,
    peer: Option<SocketAddr>,
    closed: AtomicBool,
    stats: StatsCounters,
}

/// Framed transport over TCP.
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S: AsyncRead + AsyncWrite + Send + 'static> StreamTransport<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            read_timeout: None,
            peer: None,
            closed: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    /// Fail `receive` with `TransportError::Timeout` when no frame arrives
    /// within `timeout`.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Record the remote address.
    #[must_use]
    pub fn with_peer_addr(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

impl TcpTransport {
    /// Wrap a TCP stream, disabling Nagle for small control messages.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        // Best effort; the transport still works with Nagle on.
        let _ = stream.set_nodelay(true);
        let mut transport = Self::new(stream);
        transport.peer = peer;
        transport
    }

    /// Connect to `addr` within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Timeout` or `TransportError::ConnectionFailed`.
    pub async fn connect(addr: &str, timeout: Duration) -> TransportResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
        Ok(Self::from_tcp(stream))
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> Transport for StreamTransport<S> {
    async fn send(&self, buf: &[u8]) -> TransportResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().await;
        match write_frame(&mut *writer, buf).await {
            Ok(()) => {
                self.stats.record_send(buf.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(e)
            }
        }
    }

    async fn receive(&self) -> TransportResult<Vec<u8>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let result = match self.read_timeout {
            Some(t) => tokio::time::timeout(t, read_frame(&mut *reader))
                .await
                .map_err(|_| TransportError::Timeout)
                .and_then(|r| r),
            None => read_frame(&mut *reader).await,
        };
        match result {
            Ok(frame) => {
                self.stats.record_recv(frame.len());
                Ok(frame)
            }
            Err(e) => {
                self.stats.record_recv_error();
                Err(e)
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        // The peer may already be gone; closing is still complete locally.
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_duplex_send_receive() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let a = StreamTransport::new(a);
        let b = StreamTransport::new(b);

        a.send(b"Hello, Ferry!").await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"Hello, Ferry!");

        b.send(b"ack").await.unwrap();
        assert_eq!(a.receive().await.unwrap(), b"ack");

        assert_eq!(a.stats().messages_sent, 1);
        assert_eq!(a.stats().bytes_received, 3);
    }

    #[tokio::test]
    async fn test_concurrent_send_while_receiving() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let a = Arc::new(StreamTransport::new(a));
        let b = StreamTransport::new(b);

        let reader = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.receive().await })
        };
        a.send(b"ping").await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"ping");
        b.send(b"pong").await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (a, _b) = tokio::io::duplex(1024);
        let a = StreamTransport::new(a).with_read_timeout(Duration::from_millis(50));
        assert!(matches!(a.receive().await, Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_close() {
        let (a, b) = tokio::io::duplex(1024);
        let a = StreamTransport::new(a);
        let b = StreamTransport::new(b);

        assert!(!a.is_closed());
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(matches!(a.send(b"x").await, Err(TransportError::Closed)));
        assert!(matches!(b.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let t = TcpTransport::from_tcp(stream);
            let msg = t.receive().await.unwrap();
            t.send(&msg).await.unwrap();
        });

        let client = TcpTransport::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(client.peer_addr().is_some());
        client.send(&[1, 2, 3]).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), vec![1, 2, 3]);
        server.await.unwrap();
    }
}
