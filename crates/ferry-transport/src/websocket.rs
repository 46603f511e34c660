//! WebSocket adapter for the `Transport` trait.
//!
//! Each `send` becomes one binary WebSocket message, so no extra length
//! framing is needed. Text messages are accepted on receive and returned as
//! their UTF-8 bytes.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Largest single WebSocket message Ferry sends.
pub const WS_MAX_MESSAGE: usize = 64 * 1024;

/// Transport over an established WebSocket.
pub struct WsTransport<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
    stats: StatsCounters,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an accepted or connected WebSocket.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Connect to a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the handshake fails.
    pub async fn connect(url: &str) -> TransportResult<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{url}: {e}")))?;
        debug!("WebSocket connected to {}", url);
        Ok(Self::new(ws))
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::ConnectionClosed | Error::AlreadyClosed => TransportError::Closed,
        Error::Io(io) => TransportError::Io(io),
        other => TransportError::Other(other.to_string()),
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, buf: &[u8]) -> TransportResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if buf.len() > WS_MAX_MESSAGE {
            return Err(TransportError::FrameTooLarge {
                size: buf.len(),
                max: WS_MAX_MESSAGE,
            });
        }

        let mut sink = self.sink.lock().await;
        match sink.send(Message::Binary(buf.to_vec().into())).await {
            Ok(()) => {
                self.stats.record_send(buf.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(ws_error(e))
            }
        }
    }

    async fn receive(&self) -> TransportResult<Vec<u8>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        let mut stream = self.stream.lock().await;
        loop {
            let msg = match stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.stats.record_recv_error();
                    return Err(ws_error(e));
                }
                None => return Err(TransportError::Closed),
            };
            let payload: Vec<u8> = match msg {
                Message::Binary(data) => data.into(),
                Message::Text(text) => text.as_bytes().to_vec(),
                Message::Close(_) => return Err(TransportError::Closed),
                // Ping/pong are answered by tungstenite itself.
                _ => continue,
            };
            self.stats.record_recv(payload.len());
            return Ok(payload);
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        // A peer that already hung up makes this fail; nothing left to do then.
        let _ = sink.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_ws_send_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let t = WsTransport::new(ws);
            let msg = t.receive().await.unwrap();
            t.send(&msg).await.unwrap();
            t.close().await.unwrap();
        });

        let client = WsTransport::connect(&format!("ws://{addr}")).await.unwrap();
        client.send(b"over websocket").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"over websocket");
        assert!(matches!(
            client.receive().await,
            Err(TransportError::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_rejects_oversized() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let client = WsTransport::connect(&format!("ws://{addr}")).await.unwrap();
        let big = vec![0u8; WS_MAX_MESSAGE + 1];
        assert!(matches!(
            client.send(&big).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }
}
