//! Broker client.

use super::protocol::ChannelRecord;
use crate::error::{RelayError, RelayResult};
use ferry_transport::{Transport, TransportError, WsTransport};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::MaybeTlsStream;
use tracing::debug;

/// Default wait for a broker reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// One member's connection to a broker channel.
pub struct BrokerClient {
    transport: WsTransport<MaybeTlsStream<TcpStream>>,
    channel: String,
    uuid: String,
    role: Option<u8>,
    reply_timeout: Duration,
}

impl BrokerClient {
    /// Connect without joining a channel.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidMessage` for a non-WebSocket URL and
    /// transport errors if the connection fails.
    pub async fn connect(url: &str) -> RelayResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| RelayError::InvalidMessage(format!("bad broker URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidMessage(format!(
                "broker URL must be ws:// or wss://, got {url}"
            )));
        }
        let transport = WsTransport::connect(url).await?;
        Ok(Self {
            transport,
            channel: String::new(),
            uuid: String::new(),
            role: None,
            reply_timeout: REPLY_TIMEOUT,
        })
    }

    /// Connect and join `channel` (or a broker-chosen one) as `role`.
    /// Returns the client and the first channel state.
    ///
    /// # Errors
    ///
    /// Returns the broker's refusal (for example
    /// `RelayError::RoleOccupied`) or a transport error.
    pub async fn open(
        url: &str,
        channel: Option<&str>,
        role: u8,
        curve: Option<&str>,
    ) -> RelayResult<(Self, ChannelRecord)> {
        let mut client = Self::connect(url).await?;
        client
            .send(&ChannelRecord::open(channel, role, curve))
            .await?;
        let first = client.next_record().await?;
        client.channel.clone_from(&first.channel);
        client.uuid.clone_from(&first.uuid);
        client.role = first.role;
        debug!("Joined broker channel {} as role {}", client.channel, role);
        Ok((client, first))
    }

    /// Change how long [`next_record`](Self::next_record) waits.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Channel name (empty before joining).
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Membership UUID (empty before joining).
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Role held in the channel.
    #[must_use]
    pub fn role(&self) -> Option<u8> {
        self.role
    }

    /// Send a raw record.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or sending fails.
    pub async fn send(&mut self, record: &ChannelRecord) -> RelayResult<()> {
        let json = record.to_json()?;
        self.transport.send(json.as_bytes()).await?;
        Ok(())
    }

    /// Merge `fields` into the channel.
    ///
    /// # Errors
    ///
    /// Returns error if sending fails.
    pub async fn update(&mut self, fields: ChannelRecord) -> RelayResult<()> {
        let record = ChannelRecord {
            update: true,
            open: false,
            close: false,
            channel: self.channel.clone(),
            uuid: self.uuid.clone(),
            ..fields
        };
        self.send(&record).await
    }

    /// Wait for the next channel state.
    ///
    /// # Errors
    ///
    /// Returns the broker's error as a typed `RelayError`,
    /// `RelayError::Closed` if the broker hung up, or `RelayError::Timeout`.
    pub async fn next_record(&mut self) -> RelayResult<ChannelRecord> {
        let bytes = time::timeout(self.reply_timeout, self.transport.receive())
            .await
            .map_err(|_| RelayError::Timeout)?
            .map_err(|e| match e {
                TransportError::Closed => RelayError::Closed,
                other => RelayError::Transport(other),
            })?;
        let record = ChannelRecord::from_json(&bytes)?;
        if let Some(message) = record.error.as_deref().filter(|_| record.is_broker_error()) {
            return Err(RelayError::from_relay_message(message));
        }
        Ok(record)
    }

    /// Delete the channel and hang up.
    ///
    /// # Errors
    ///
    /// Returns error if the close request cannot be sent.
    pub async fn close(&mut self) -> RelayResult<()> {
        if !self.uuid.is_empty() {
            let record = ChannelRecord {
                close: true,
                channel: self.channel.clone(),
                uuid: self.uuid.clone(),
                ..ChannelRecord::default()
            };
            self.send(&record).await?;
        }
        self.transport.close().await?;
        Ok(())
    }
}
