//! WebSocket channel broker.

use super::pipe::{PipeRooms, room_from_query};
use super::protocol::{ChannelRecord, ROLE_RECEIVER, ROLE_SENDER};
use crate::error::{RelayError, RelayResult};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Idle time after which a channel, or a pipe room nobody joined, is
    /// collected
    pub channel_ttl: Duration,
    /// How often idle channels and pipe rooms are swept
    pub cleanup_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_ttl: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

type Outbox = mpsc::UnboundedSender<Message>;

struct Member {
    uuid: String,
    outbox: Outbox,
}

/// Broker-side state of one channel.
#[derive(Default)]
struct Channel {
    members: [Option<Member>; 2],
    ports: Option<Vec<u16>>,
    curve: Option<String>,
    pake: Option<String>,
    encrypted_file_meta_data: Option<String>,
    transfer_ready: bool,
    file_received: bool,
    error: Option<String>,
    last_activity: Option<Instant>,
}

impl Channel {
    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    fn is_idle(&self, ttl: Duration) -> bool {
        self.last_activity.is_none_or(|t| t.elapsed() >= ttl)
    }

    fn role_of(&self, uuid: &str) -> Option<u8> {
        self.members.iter().enumerate().find_map(|(role, m)| {
            m.as_ref()
                .filter(|m| m.uuid == uuid)
                .and_then(|_| u8::try_from(role).ok())
        })
    }

    /// Copy every state field the client supplied.
    fn merge(&mut self, record: ChannelRecord) {
        if record.ports.is_some() {
            self.ports = record.ports;
        }
        if self.curve.is_none() && record.curve.is_some() {
            self.curve = record.curve;
        }
        if record.pake.is_some() {
            self.pake = record.pake;
        }
        if record.encrypted_file_meta_data.is_some() {
            self.encrypted_file_meta_data = record.encrypted_file_meta_data;
        }
        self.file_received |= record.file_received;
        if record.error.is_some() {
            self.error = record.error;
        }
    }

    fn view(&self, name: &str, role: u8, uuid: &str) -> ChannelRecord {
        ChannelRecord {
            channel: name.to_string(),
            uuid: uuid.to_string(),
            role: Some(role),
            pake: self.pake.clone(),
            ports: self.ports.clone(),
            curve: self.curve.clone(),
            encrypted_file_meta_data: self.encrypted_file_meta_data.clone(),
            transfer_ready: self.transfer_ready,
            file_received: self.file_received,
            error: self.error.clone(),
            ..ChannelRecord::default()
        }
    }

    /// Send the current state to every member.
    fn broadcast(&self, name: &str) {
        for (role, member) in self.members.iter().enumerate() {
            let Some(member) = member else { continue };
            let Ok(role) = u8::try_from(role) else { continue };
            match self.view(name, role, &member.uuid).to_json() {
                Ok(json) => {
                    let _ = member.outbox.send(Message::Text(json.into()));
                }
                Err(e) => error!("Failed to serialize channel state: {}", e),
            }
        }
    }

    /// Close every member connection, telling them why first if `reason`.
    fn shut(&self, reason: Option<&str>, except: Option<u8>) {
        for (role, member) in self.members.iter().enumerate() {
            let Some(member) = member else { continue };
            if except.is_some_and(|r| usize::from(r) == role) {
                continue;
            }
            if let Some(reason) = reason {
                send_error(&member.outbox, reason);
            }
            let _ = member.outbox.send(Message::Close(None));
        }
    }
}

type ChannelMap = Arc<RwLock<HashMap<String, Channel>>>;

/// What the connection loop should do after a message.
enum Flow {
    Continue,
    Done,
}

/// Rendezvous broker that lets two peers exchange channel state over
/// WebSocket.
pub struct Broker {
    listener: TcpListener,
    channels: ChannelMap,
    pipes: PipeRooms,
    config: BrokerConfig,
}

impl Broker {
    /// Bind the broker.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails.
    pub async fn bind(addr: SocketAddr) -> RelayResult<Self> {
        Self::bind_with_config(addr, BrokerConfig::default()).await
    }

    /// Bind with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails.
    pub async fn bind_with_config(addr: SocketAddr, config: BrokerConfig) -> RelayResult<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            channels: Arc::new(RwLock::new(HashMap::new())),
            pipes: PipeRooms::default(),
            config,
        })
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be read.
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of live channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of pipe rooms waiting for their second member.
    pub async fn pipe_count(&self) -> usize {
        self.pipes.len().await
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns the accept error that stopped the broker.
    pub async fn run(self) -> RelayResult<()> {
        info!("Broker listening on {}", self.local_addr()?);
        let cleanup = self.spawn_cleanup_task();

        let result = loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let channels = Arc::clone(&self.channels);
                    let pipes = self.pipes.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, channels, pipes).await {
                            debug!("Broker connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Broker accept failed: {}", e);
                    break Err(RelayError::Io(e));
                }
            }
        };

        cleanup.abort();
        result
    }

    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let channels = Arc::clone(&self.channels);
        let pipes = self.pipes.clone();
        let ttl = self.config.channel_ttl;
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                channels.write().await.retain(|name, channel| {
                    if !channel.is_idle(ttl) {
                        return true;
                    }
                    info!("Channel {} expired", name);
                    channel.shut(Some("room expired"), None);
                    false
                });
                pipes.expire(ttl).await;
            }
        })
    }
}

/// Channel slot a connection holds.
struct Membership {
    name: String,
    role: u8,
    uuid: String,
}

/// Delete the channel a departing member belonged to, unless the name has
/// since been taken by a different channel.
async fn leave(channels: &ChannelMap, membership: &Membership) {
    let mut map = channels.write().await;
    let ours = map
        .get(&membership.name)
        .and_then(|c| c.role_of(&membership.uuid))
        == Some(membership.role);
    if !ours {
        debug!("Channel {} no longer ours; leaving it", membership.name);
        return;
    }
    if let Some(channel) = map.remove(&membership.name) {
        debug!("Member left; deleting channel {}", membership.name);
        channel.shut(None, Some(membership.role));
    }
}

fn send_error(outbox: &Outbox, message: &str) {
    if let Ok(json) = ChannelRecord::error(message).to_json() {
        let _ = outbox.send(Message::Text(json.into()));
    }
}

fn random_channel_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    channels: ChannelMap,
    pipes: PipeRooms,
) -> RelayResult<()> {
    let mut room = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            room = room_from_query(req.uri().query());
            Ok(resp)
        },
    )
    .await?;
    if let Some(room) = room {
        return pipes.join(room, ws, Some(peer.ip().to_string())).await;
    }

    let (mut sink, mut source) = ws.split();

    let (outbox, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let mut joined: Option<Membership> = None;
    while let Some(msg) = source.next().await {
        let bytes: Vec<u8> = match msg {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.into(),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let flow = match ChannelRecord::from_json(&bytes) {
            Ok(record) => {
                debug!("Broker received {}", record.message_type());
                handle_record(&channels, &outbox, &mut joined, record).await
            }
            Err(e) => Err(RelayError::InvalidMessage(e.to_string())),
        };
        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Done) => break,
            Err(e) => {
                warn!("Broker rejected message: {}", e);
                send_error(&outbox, &e.to_string());
                let _ = outbox.send(Message::Close(None));
                break;
            }
        }
    }

    if let Some(membership) = joined {
        leave(&channels, &membership).await;
    }
    drop(outbox);
    let _ = writer.await;
    Ok(())
}

async fn handle_record(
    channels: &ChannelMap,
    outbox: &Outbox,
    joined: &mut Option<Membership>,
    record: ChannelRecord,
) -> RelayResult<Flow> {
    if record.open {
        if joined.is_some() {
            return Err(RelayError::InvalidMessage("already joined".into()));
        }
        let role = record.role.unwrap_or(ROLE_SENDER);
        if role != ROLE_SENDER && role != ROLE_RECEIVER {
            return Err(RelayError::InvalidRole(role));
        }
        let name = if record.channel.is_empty() {
            random_channel_name()
        } else {
            record.channel.clone()
        };

        let mut map = channels.write().await;
        let channel = map.entry(name.clone()).or_default();
        let slot = &mut channel.members[usize::from(role)];
        if slot.is_some() {
            return Err(RelayError::RoleOccupied(role));
        }
        let uuid = Uuid::new_v4().to_string();
        *slot = Some(Member {
            uuid: uuid.clone(),
            outbox: outbox.clone(),
        });
        channel.merge(record);
        channel.transfer_ready = channel.members.iter().all(Option::is_some);
        channel.touch();
        info!("Role {} joined channel {}", role, name);
        channel.broadcast(&name);
        *joined = Some(Membership { name, role, uuid });
        return Ok(Flow::Continue);
    }

    if record.update {
        let mut map = channels.write().await;
        let channel = map
            .get_mut(&record.channel)
            .ok_or(RelayError::RoomNotFound)?;
        if channel.role_of(&record.uuid).is_none() {
            return Err(RelayError::InvalidUuid(record.uuid));
        }
        let name = record.channel.clone();
        channel.merge(record);
        channel.touch();
        channel.broadcast(&name);
        return Ok(Flow::Continue);
    }

    if record.close {
        let mut map = channels.write().await;
        let channel = map.get(&record.channel).ok_or(RelayError::RoomNotFound)?;
        let Some(role) = channel.role_of(&record.uuid) else {
            return Err(RelayError::InvalidUuid(record.uuid));
        };
        if let Some(channel) = map.remove(&record.channel) {
            info!("Channel {} closed by role {}", record.channel, role);
            channel.shut(None, None);
        }
        *joined = None;
        return Ok(Flow::Done);
    }

    Err(RelayError::InvalidMessage(
        "expected open, update or close".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::client::BrokerClient;

    async fn start(config: BrokerConfig) -> (String, ChannelMap) {
        let broker = Broker::bind_with_config("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let url = format!("ws://{}", broker.local_addr().unwrap());
        let channels = Arc::clone(&broker.channels);
        tokio::spawn(broker.run());
        (url, channels)
    }

    #[tokio::test]
    async fn test_broker_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.channel_ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_open_both_roles_sets_transfer_ready() {
        let (url, channels) = start(BrokerConfig::default()).await;

        let (mut sender, first) = BrokerClient::open(&url, Some("c1"), ROLE_SENDER, Some("p256"))
            .await
            .unwrap();
        assert!(!first.transfer_ready);
        assert_eq!(first.curve.as_deref(), Some("p256"));

        let (mut receiver, joined) = BrokerClient::open(&url, Some("c1"), ROLE_RECEIVER, None)
            .await
            .unwrap();
        assert!(joined.transfer_ready);
        assert_ne!(sender.uuid(), receiver.uuid());

        let seen = sender.next_record().await.unwrap();
        assert!(seen.transfer_ready);
        assert_eq!(seen.uuid, sender.uuid());
        assert_eq!(seen.role, Some(ROLE_SENDER));
        assert_eq!(channels.read().await.len(), 1);

        receiver.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channels.read().await.len(), 0);
    }

    #[tokio::test]
    async fn test_role_collision() {
        let (url, _) = start(BrokerConfig::default()).await;
        let _first = BrokerClient::open(&url, Some("c2"), ROLE_SENDER, None)
            .await
            .unwrap();
        let second = BrokerClient::open(&url, Some("c2"), ROLE_SENDER, None).await;
        assert!(matches!(second, Err(RelayError::RoleOccupied(0))));
    }

    #[tokio::test]
    async fn test_random_channel_name() {
        let (url, _) = start(BrokerConfig::default()).await;
        let (client, record) = BrokerClient::open(&url, None, ROLE_SENDER, None)
            .await
            .unwrap();
        assert_eq!(record.channel.len(), 8);
        assert_eq!(client.channel(), record.channel);
    }

    #[tokio::test]
    async fn test_update_broadcasts() {
        let (url, _) = start(BrokerConfig::default()).await;
        let (mut a, _) = BrokerClient::open(&url, Some("c3"), ROLE_SENDER, None)
            .await
            .unwrap();
        let (mut b, _) = BrokerClient::open(&url, Some("c3"), ROLE_RECEIVER, None)
            .await
            .unwrap();
        let _ready = a.next_record().await.unwrap();

        a.update(ChannelRecord {
            pake: Some("cGFrZQ==".into()),
            ports: Some(vec![9010, 9011]),
            ..ChannelRecord::default()
        })
        .await
        .unwrap();

        let at_a = a.next_record().await.unwrap();
        let at_b = b.next_record().await.unwrap();
        assert_eq!(at_b.pake.as_deref(), Some("cGFrZQ=="));
        assert_eq!(at_b.ports, Some(vec![9010, 9011]));
        assert_eq!(at_a.pake, at_b.pake);
        assert_eq!(at_b.uuid, b.uuid());
    }

    #[tokio::test]
    async fn test_update_with_foreign_uuid() {
        let (url, _) = start(BrokerConfig::default()).await;
        let (_a, _) = BrokerClient::open(&url, Some("c4"), ROLE_SENDER, None)
            .await
            .unwrap();

        let mut intruder = BrokerClient::connect(&url).await.unwrap();
        intruder
            .send(&ChannelRecord {
                update: true,
                channel: "c4".into(),
                uuid: "not-a-member".into(),
                ..ChannelRecord::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            intruder.next_record().await,
            Err(RelayError::InvalidUuid(u)) if u == "not-a-member"
        ));
    }

    #[tokio::test]
    async fn test_idle_channel_collected() {
        let config = BrokerConfig {
            channel_ttl: Duration::from_millis(100),
            cleanup_interval: Duration::from_millis(50),
        };
        let (url, channels) = start(config).await;
        let (mut a, _) = BrokerClient::open(&url, Some("c5"), ROLE_SENDER, None)
            .await
            .unwrap();

        assert!(matches!(
            a.next_record().await,
            Err(RelayError::Refused(r)) if r == "room expired"
        ));
        assert_eq!(channels.read().await.len(), 0);

        let mut late = BrokerClient::connect(&url).await.unwrap();
        late.send(&ChannelRecord {
            update: true,
            channel: "c5".into(),
            uuid: "whatever".into(),
            ..ChannelRecord::default()
        })
        .await
        .unwrap();
        assert!(matches!(
            late.next_record().await,
            Err(RelayError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_leave_spares_reopened_channel() {
        let channels: ChannelMap = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reopened = Channel::default();
        reopened.members[0] = Some(Member {
            uuid: "newcomer".into(),
            outbox: tx.clone(),
        });
        channels.write().await.insert("c7".into(), reopened);

        // A stale member of the earlier channel with the same name and role.
        let stale = Membership {
            name: "c7".into(),
            role: ROLE_SENDER,
            uuid: "departed".into(),
        };
        leave(&channels, &stale).await;
        assert!(channels.read().await.contains_key("c7"));
        assert!(rx.try_recv().is_err());

        let current = Membership {
            name: "c7".into(),
            role: ROLE_SENDER,
            uuid: "newcomer".into(),
        };
        leave(&channels, &current).await;
        assert!(channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_reopened_name_survives_stale_disconnect() {
        let (url, channels) = start(BrokerConfig::default()).await;
        let (mut a, _) = BrokerClient::open(&url, Some("c8"), ROLE_SENDER, None)
            .await
            .unwrap();
        let (_b, _) = BrokerClient::open(&url, Some("c8"), ROLE_RECEIVER, None)
            .await
            .unwrap();
        a.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(channels.read().await.is_empty());

        let (_c, record) = BrokerClient::open(&url, Some("c8"), ROLE_SENDER, None)
            .await
            .unwrap();
        assert_eq!(record.channel, "c8");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channels.read().await.len(), 1);
    }

    async fn start_broker(config: BrokerConfig) -> (String, PipeRooms) {
        let broker = Broker::bind_with_config("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let url = format!("ws://{}", broker.local_addr().unwrap());
        let pipes = broker.pipes.clone();
        tokio::spawn(broker.run());
        (url, pipes)
    }

    #[tokio::test]
    async fn test_pipe_pairs_and_forwards() {
        use crate::broker::pipe::connect_pipe;
        use ferry_transport::Transport;

        let (url, pipes) = start_broker(BrokerConfig::default()).await;
        let wait = Duration::from_secs(5);
        let first = tokio::spawn({
            let url = url.clone();
            async move { connect_pipe(&url, "pipe-room-1", wait).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pipes.len().await, 1);

        let second = connect_pipe(&url, "pipe-room-1", wait).await.unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.observed_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(pipes.len().await, 0);

        first.transport.send(b"over the pipe").await.unwrap();
        assert_eq!(second.transport.receive().await.unwrap(), b"over the pipe");
        second.transport.send(&[7u8; 20_000]).await.unwrap();
        assert_eq!(first.transport.receive().await.unwrap(), vec![7u8; 20_000]);

        first.transport.close().await.unwrap();
        assert!(second.transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_pipe_rejects_invalid_token() {
        let (url, pipes) = start_broker(BrokerConfig::default()).await;
        let result =
            crate::broker::pipe::connect_pipe(&url, "bad token!", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RelayError::InvalidToken)));
        assert_eq!(pipes.len().await, 0);
    }

    #[tokio::test]
    async fn test_unjoined_pipe_expires() {
        let config = BrokerConfig {
            channel_ttl: Duration::from_millis(100),
            cleanup_interval: Duration::from_millis(50),
        };
        let (url, pipes) = start_broker(config).await;
        let result =
            crate::broker::pipe::connect_pipe(&url, "pipe-lonely", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RelayError::Refused(r)) if r == "room expired"));
        assert_eq!(pipes.len().await, 0);
    }

    #[tokio::test]
    async fn test_departed_waiter_frees_pipe_room() {
        let (url, pipes) = start_broker(BrokerConfig::default()).await;
        let gone = crate::broker::pipe::connect_pipe(&url, "pipe-gone", Duration::from_millis(200))
            .await;
        assert!(matches!(gone, Err(RelayError::NoCounterpart)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pipes.len().await, 0);
    }

    #[test]
    fn test_channel_role_lookup() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut channel = Channel::default();
        channel.members[1] = Some(Member {
            uuid: "abc".into(),
            outbox: tx,
        });
        assert_eq!(channel.role_of("abc"), Some(1));
        assert_eq!(channel.role_of("nope"), None);
        assert!(channel.is_idle(Duration::from_secs(1)));
        channel.touch();
        assert!(!channel.is_idle(Duration::from_secs(1)));
    }
}
