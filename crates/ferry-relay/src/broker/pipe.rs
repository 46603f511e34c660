//! WebSocket pipes.
//!
//! A connection to the broker URL with a `?room=<token>` query skips the
//! channel protocol. The first connection for a token waits; the second
//! one pairs with it, both receive a `paired|||<own ip>` text message, and
//! from then on every data message from one side is forwarded to the
//! other. This is how a transfer runs entirely over WebSocket.

use crate::error::{RelayError, RelayResult};
use crate::lane::{ERR_INVALID_TOKEN, ERR_ROOM_EXPIRED, PAIRED, is_valid_token};
use ferry_transport::{Transport, WsTransport};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Query parameter naming the pipe room.
pub const ROOM_PARAM: &str = "room";

type Ws = WebSocketStream<TcpStream>;

struct Waiting {
    id: u64,
    created: Instant,
    tx: oneshot::Sender<(Ws, Option<String>)>,
}

/// Pipe rooms waiting for their second member.
#[derive(Clone, Default)]
pub(crate) struct PipeRooms {
    rooms: Arc<RwLock<HashMap<String, Waiting>>>,
    next_id: Arc<AtomicU64>,
}

impl PipeRooms {
    pub(crate) async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Drop rooms that waited longer than `ttl`; their members are told the
    /// room expired.
    pub(crate) async fn expire(&self, ttl: Duration) {
        self.rooms.write().await.retain(|_, waiting| {
            let alive = waiting.created.elapsed() < ttl;
            if !alive {
                info!("Pipe room expired");
            }
            alive
        });
    }

    /// Pair `ws` with whoever waits under `room`, or wait there.
    pub(crate) async fn join(&self, room: String, mut ws: Ws, ip: Option<String>) -> RelayResult<()> {
        if !is_valid_token(&room) {
            warn!("Rejecting invalid pipe room token");
            let _ = ws.send(Message::Text(ERR_INVALID_TOKEN.into())).await;
            let _ = ws.close(None).await;
            return Err(RelayError::InvalidToken);
        }

        let mut ip = ip;
        loop {
            let (id, rx) = {
                let mut rooms = self.rooms.write().await;
                match rooms.remove(&room) {
                    Some(waiting) => {
                        drop(rooms);
                        match waiting.tx.send((ws, ip)) {
                            Ok(()) => return Ok(()),
                            Err((back, back_ip)) => {
                                ws = back;
                                ip = back_ip;
                                continue;
                            }
                        }
                    }
                    None => {
                        let (tx, rx) = oneshot::channel();
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        rooms.insert(
                            room.clone(),
                            Waiting {
                                id,
                                created: Instant::now(),
                                tx,
                            },
                        );
                        (id, rx)
                    }
                }
            };

            let counterpart = tokio::select! {
                res = rx => res,
                // Members stay silent until paired, so anything here means
                // the waiter hung up.
                _ = ws.next() => {
                    self.forget(&room, id).await;
                    debug!("Waiting pipe member left");
                    return Ok(());
                }
            };
            let Ok((mut other, other_ip)) = counterpart else {
                let _ = ws.send(Message::Text(ERR_ROOM_EXPIRED.into())).await;
                let _ = ws.close(None).await;
                return Err(RelayError::Refused("room expired".into()));
            };

            if ws.send(paired_message(ip.as_deref())).await.is_err() {
                debug!("Waiting pipe member vanished at pairing; newcomer takes its place");
                ws = other;
                ip = other_ip;
                continue;
            }
            other.send(paired_message(other_ip.as_deref())).await?;
            info!("Paired pipe room");
            splice(ws, other).await;
            return Ok(());
        }
    }

    async fn forget(&self, room: &str, id: u64) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room).is_some_and(|w| w.id == id) {
            rooms.remove(room);
        }
    }
}

fn paired_message(ip: Option<&str>) -> Message {
    Message::Text(format!("{PAIRED}|||{}", ip.unwrap_or_default()).into())
}

/// Room token from a request URI's query, if it has one.
pub(crate) fn room_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == ROOM_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Forward data messages both ways until either side stops, then close
/// both.
async fn splice(a: Ws, b: Ws) {
    let (mut a_sink, mut a_source) = a.split();
    let (mut b_sink, mut b_source) = b.split();
    tokio::select! {
        () = forward(&mut a_source, &mut b_sink) => {}
        () = forward(&mut b_source, &mut a_sink) => {}
    }
    let _ = a_sink.close().await;
    let _ = b_sink.close().await;
    debug!("Pipe closed");
}

async fn forward<S, T>(from: &mut S, to: &mut T)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    T: futures_util::Sink<Message> + Unpin,
{
    while let Some(Ok(msg)) = from.next().await {
        match msg {
            Message::Binary(_) | Message::Text(_) => {
                if to.send(msg).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// A WebSocket paired through the broker.
pub struct PipeConnection {
    /// Transport to the counterpart
    pub transport: WsTransport<MaybeTlsStream<TcpStream>>,
    /// Our address as the broker saw it
    pub observed_ip: Option<String>,
}

/// Join pipe room `token` on the broker at `url` and wait up to `wait` for
/// the counterpart.
///
/// # Errors
///
/// Returns `RelayError::NoCounterpart` if nobody joins in time, the
/// broker's refusal, or a transport error.
pub async fn connect_pipe(url: &str, token: &str, wait: Duration) -> RelayResult<PipeConnection> {
    let mut parsed = url::Url::parse(url)
        .map_err(|e| RelayError::InvalidMessage(format!("bad broker URL {url}: {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(RelayError::InvalidMessage(format!(
            "broker URL must be ws:// or wss://, got {url}"
        )));
    }
    parsed
        .query_pairs_mut()
        .clear()
        .append_pair(ROOM_PARAM, token);

    let transport = WsTransport::connect(parsed.as_str()).await?;
    let reply = time::timeout(wait, transport.receive())
        .await
        .map_err(|_| RelayError::NoCounterpart)??;
    let reply = String::from_utf8_lossy(&reply);
    let Some(ip) = reply
        .strip_prefix(PAIRED)
        .and_then(|rest| rest.strip_prefix("|||"))
    else {
        let _ = transport.close().await;
        return Err(RelayError::from_relay_message(&reply));
    };
    debug!("Pipe paired via {}", url);
    Ok(PipeConnection {
        transport,
        observed_ip: (!ip.is_empty()).then(|| ip.to_string()),
    })
}
