//! How a transfer reaches its peer.
//!
//! The state machine never opens sockets itself; it asks a [`Connector`]
//! for a control transport and for each data lane. [`RelayConnector`] goes
//! through the lane relay, [`WsConnector`] through pipes on the WebSocket
//! broker; tests plug in in-memory pipes.

use crate::config::{ClientConfig, MAX_BLOCK_SIZE};
use crate::error::Result;
use async_trait::async_trait;
use ferry_files::WS_BLOCK_SIZE;
use ferry_relay::{RelayError, connect_lane, connect_pipe};
use ferry_transport::{StreamTransport, TcpTransport, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Bytes buffered in each direction of an in-memory pipe.
const PIPE_CAPACITY: usize = 256 * 1024;

/// A paired control channel.
pub struct ControlLink {
    /// Transport to the peer
    pub transport: Box<dyn Transport>,
    /// Our address as the rendezvous point saw it
    pub observed_ip: Option<String>,
}

/// Source of transports to the peer.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Join the control room `room`.
    async fn control(&self, room: &str) -> Result<ControlLink>;

    /// Open data lane `lane`, paired under `token`.
    async fn lane(&self, lane: u32, token: &str) -> Result<Box<dyn Transport>>;

    /// Largest block size the sender should plan with over these transports.
    fn max_block_size(&self) -> u32 {
        MAX_BLOCK_SIZE
    }
}

/// Connects through a TCP lane relay.
#[derive(Debug, Clone)]
pub struct RelayConnector {
    config: ClientConfig,
}

impl RelayConnector {
    /// Connector for the relay named in `config`.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn wait(&self) -> Duration {
        self.config.timeouts.rendezvous
    }
}

#[async_trait]
impl Connector for RelayConnector {
    async fn control(&self, room: &str) -> Result<ControlLink> {
        let addr = self.config.relay_addr(self.config.control_port());
        debug!("Joining control room at {}", addr);
        let lane = connect_lane(&addr, room, self.wait()).await?;
        Ok(ControlLink {
            transport: Box::new(TcpTransport::from_tcp(lane.stream)),
            observed_ip: lane.observed_ip,
        })
    }

    async fn lane(&self, lane: u32, token: &str) -> Result<Box<dyn Transport>> {
        let addr = self.config.relay_addr(self.config.lane_port(lane));
        debug!("Opening data lane {} via {}", lane, addr);
        let conn = connect_lane(&addr, token, self.wait()).await?;
        Ok(Box::new(TcpTransport::from_tcp(conn.stream)))
    }
}

/// Connects through pipes on a WebSocket broker.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    wait: Duration,
}

impl WsConnector {
    /// Connector for the broker at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, wait: Duration) -> Self {
        Self {
            url: url.into(),
            wait,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn control(&self, room: &str) -> Result<ControlLink> {
        debug!("Joining control pipe at {}", self.url);
        let pipe = connect_pipe(&self.url, room, self.wait).await?;
        Ok(ControlLink {
            transport: Box::new(pipe.transport),
            observed_ip: pipe.observed_ip,
        })
    }

    async fn lane(&self, lane: u32, token: &str) -> Result<Box<dyn Transport>> {
        debug!("Opening data lane {} over WebSocket", lane);
        let pipe = connect_pipe(&self.url, token, self.wait).await?;
        Ok(Box::new(pipe.transport))
    }

    fn max_block_size(&self) -> u32 {
        WS_BLOCK_SIZE
    }
}

/// Two framed transports joined by an in-memory pipe.
#[must_use]
pub fn duplex_pair() -> (Box<dyn Transport>, Box<dyn Transport>) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (
        Box::new(StreamTransport::new(a)),
        Box::new(StreamTransport::new(b)),
    )
}

type Waiting = HashMap<String, oneshot::Sender<Box<dyn Transport>>>;

/// In-process rendezvous: pairs callers that use the same room or lane
/// token, like the relay does, without any sockets.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    waiting: Arc<Mutex<Waiting>>,
}

impl MemoryConnector {
    /// Empty rendezvous. Clone it to hand one to each side.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn meet(&self, key: String) -> Result<Box<dyn Transport>> {
        let rx = {
            let mut waiting = self
                .waiting
                .lock()
                .map_err(|_| RelayError::InvalidMessage("rendezvous poisoned".into()))?;
            match waiting.remove(&key) {
                Some(tx) => {
                    let (ours, theirs) = duplex_pair();
                    tx.send(theirs).map_err(|_| RelayError::NoCounterpart)?;
                    return Ok(ours);
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    waiting.insert(key, tx);
                    rx
                }
            }
        };
        Ok(rx.await.map_err(|_| RelayError::NoCounterpart)?)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn control(&self, room: &str) -> Result<ControlLink> {
        Ok(ControlLink {
            transport: self.meet(format!("control/{room}")).await?,
            observed_ip: Some("127.0.0.1".to_string()),
        })
    }

    async fn lane(&self, lane: u32, token: &str) -> Result<Box<dyn Transport>> {
        self.meet(format!("lane/{lane}/{token}")).await
    }
}
