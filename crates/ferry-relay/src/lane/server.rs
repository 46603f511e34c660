//! TCP lane relay server.

use super::{
    BANNER, ERR_INVALID_TOKEN, ERR_ROOM_EXPIRED, PAIRED, PING, PONG, is_valid_token,
};
use crate::error::{RelayError, RelayResult};
use ferry_transport::framing::{read_control, write_control};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Lane relay configuration
#[derive(Debug, Clone)]
pub struct LaneRelayConfig {
    /// How long a half-filled room may wait for its second member
    pub room_ttl: Duration,
    /// How often expired rooms are swept
    pub cleanup_interval: Duration,
    /// Deadline for a new connection to present its room token
    pub handshake_timeout: Duration,
    /// Text sent ahead of the client's observed address
    pub banner: String,
}

impl Default for LaneRelayConfig {
    fn default() -> Self {
        Self {
            room_ttl: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            banner: BANNER.to_string(),
        }
    }
}

type RoomKey = (u16, String);

/// A connection parked in a room, waiting for its counterpart.
///
/// The waiting task owns the socket; the newcomer hands its own socket
/// over through `tx`. Dropping the entry (expiry) wakes the waiter with an
/// error.
struct Pending {
    id: u64,
    created: Instant,
    tx: oneshot::Sender<TcpStream>,
}

type RoomMap = Arc<RwLock<HashMap<RoomKey, Pending>>>;

#[derive(Clone)]
struct Shared {
    rooms: RoomMap,
    config: LaneRelayConfig,
    next_id: Arc<AtomicU64>,
}

/// Pairs TCP connections by `(port, room token)` and splices them.
pub struct LaneRelay {
    listeners: Vec<TcpListener>,
    shared: Shared,
}

impl LaneRelay {
    /// Bind one listener per port on `host`.
    ///
    /// # Errors
    ///
    /// Returns error if any port cannot be bound.
    pub async fn bind(host: &str, ports: &[u16]) -> RelayResult<Self> {
        Self::bind_with_config(host, ports, LaneRelayConfig::default()).await
    }

    /// Bind with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if any port cannot be bound.
    pub async fn bind_with_config(
        host: &str,
        ports: &[u16],
        config: LaneRelayConfig,
    ) -> RelayResult<Self> {
        let mut listeners = Vec::with_capacity(ports.len());
        for port in ports {
            listeners.push(TcpListener::bind((host, *port)).await?);
        }
        Ok(Self {
            listeners,
            shared: Shared {
                rooms: Arc::new(RwLock::new(HashMap::new())),
                config,
                next_id: Arc::new(AtomicU64::new(0)),
            },
        })
    }

    /// Addresses actually bound (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns error if a listener's address cannot be read.
    pub fn local_addrs(&self) -> RelayResult<Vec<SocketAddr>> {
        self.listeners
            .iter()
            .map(|l| l.local_addr().map_err(RelayError::from))
            .collect()
    }

    /// Number of rooms holding a waiting connection.
    pub async fn room_count(&self) -> usize {
        self.shared.rooms.read().await.len()
    }

    /// Serve all listeners until every one of them has stopped.
    ///
    /// An accept failure ends only the listener it happened on.
    ///
    /// # Errors
    ///
    /// Does not fail once bound.
    pub async fn run(self) -> RelayResult<()> {
        let cleanup = spawn_cleanup_task(&self.shared);

        let accept_tasks: Vec<JoinHandle<()>> = self
            .listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, self.shared.clone())))
            .collect();
        for task in accept_tasks {
            if let Err(e) = task.await {
                error!("Lane listener task failed: {}", e);
            }
        }

        cleanup.abort();
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, shared: Shared) {
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            error!("Lane listener has no local address: {}", e);
            return;
        }
    };
    info!("Lane relay listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = shared.handle_connection(stream, peer, port).await {
                        debug!("Lane connection from {} ended: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Accept failed on port {}, closing listener: {}", port, e);
                return;
            }
        }
    }
}

impl Shared {
    async fn handle_connection(
        self,
        mut stream: TcpStream,
        peer: SocketAddr,
        port: u16,
    ) -> RelayResult<()> {
        let _ = stream.set_nodelay(true);
        let banner = format!("{}|||{}", self.config.banner, peer.ip());
        write_control(&mut stream, &banner).await?;

        let msg = time::timeout(self.config.handshake_timeout, read_control(&mut stream))
            .await
            .map_err(|_| RelayError::Timeout)??;

        if msg == PING {
            debug!("Ping from {}", peer);
            write_control(&mut stream, PONG).await?;
            return Ok(());
        }
        if !is_valid_token(&msg) {
            warn!("Rejecting invalid room token from {}", peer);
            let _ = write_control(&mut stream, ERR_INVALID_TOKEN).await;
            return Err(RelayError::InvalidToken);
        }

        self.join((port, msg), stream).await
    }

    /// Either hand `stream` to the connection already waiting in the room,
    /// or wait there for a counterpart and then splice.
    async fn join(&self, key: RoomKey, mut stream: TcpStream) -> RelayResult<()> {
        loop {
            let (id, rx) = {
                let mut rooms = self.rooms.write().await;
                let waiting = rooms.remove(&key);
                match waiting {
                    Some(pending) => {
                        drop(rooms);
                        match pending.tx.send(stream) {
                            Ok(()) => return Ok(()),
                            Err(back) => {
                                // Waiter is gone; try again from scratch.
                                stream = back;
                                continue;
                            }
                        }
                    }
                    None => {
                        let (tx, rx) = oneshot::channel();
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        rooms.insert(
                            key.clone(),
                            Pending {
                                id,
                                created: Instant::now(),
                                tx,
                            },
                        );
                        (id, rx)
                    }
                }
            };
            debug!("Connection waiting in room on port {}", key.0);

            let counterpart = tokio::select! {
                res = rx => res,
                () = peer_left(&stream) => {
                    self.forget(&key, id).await;
                    debug!("Waiting connection left room on port {}", key.0);
                    return Ok(());
                }
            };
            let Ok(mut other) = counterpart else {
                let _ = write_control(&mut stream, ERR_ROOM_EXPIRED).await;
                return Err(RelayError::Refused("room expired".into()));
            };

            if write_control(&mut stream, PAIRED).await.is_err() {
                debug!("Waiting connection vanished at pairing; newcomer takes its place");
                stream = other;
                continue;
            }
            write_control(&mut other, PAIRED).await?;
            info!("Paired room on port {}", key.0);
            pipe(stream, other).await;
            return Ok(());
        }
    }

    async fn forget(&self, key: &RoomKey, id: u64) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(key).is_some_and(|p| p.id == id) {
            rooms.remove(key);
        }
    }
}

/// Resolves once the waiting peer hangs up or sends early data.
async fn peer_left(stream: &TcpStream) {
    let mut buf = [0u8; 1];
    let _ = stream.peek(&mut buf).await;
}

/// Forward bytes both ways until either side stops, then drop both.
async fn pipe(a: TcpStream, b: TcpStream) {
    let (mut a_read, mut a_write) = a.into_split();
    let (mut b_read, mut b_write) = b.into_split();
    let result = tokio::select! {
        r = tokio::io::copy(&mut a_read, &mut b_write) => r,
        r = tokio::io::copy(&mut b_read, &mut a_write) => r,
    };
    match result {
        Ok(n) => debug!("Splice finished after {} bytes in one direction", n),
        Err(e) => debug!("Splice ended with error: {}", e),
    }
}

fn spawn_cleanup_task(shared: &Shared) -> JoinHandle<()> {
    let rooms = Arc::clone(&shared.rooms);
    let ttl = shared.config.room_ttl;
    let interval = shared.config.cleanup_interval;

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let mut rooms = rooms.write().await;
            rooms.retain(|(port, _), pending| {
                let alive = pending.created.elapsed() < ttl;
                if !alive {
                    info!("Room on port {} expired", port);
                }
                alive
            });
        }
    })
}
