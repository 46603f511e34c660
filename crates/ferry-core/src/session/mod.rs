//! The transfer state machine.
//!
//! Both sides walk the same steps over the control channel:
//!
//! | step | sender                          | receiver                        |
//! |------|---------------------------------|---------------------------------|
//! | 0    | `Init`                          | `Init`                          |
//! | 1    | `Pake` (X), then `Pake` (H(k)) | `Pake` (Y, H(k)), then `Ready`  |
//! | 2    | `Metadata`                      |                                 |
//! | 3    | `Lanes`                         | `BlockList`                     |
//! | 4    | blocks on every lane            | `Ready` once lanes are up       |
//! | 5    | `Hash`, then `Close`            | `HashAck`                       |
//!
//! The sender is always the PAKE initiator.

pub(crate) mod receiver;
pub(crate) mod sender;

use crate::cancel::{CANCEL_GRACE, CancelToken};
use crate::config::ClientConfig;
use crate::connector::Connector;
use crate::error::{Error, HandshakeError, ProtocolError, Result};
use crate::message::{Message, PROTOCOL_VERSION, version_compatible};
use crate::status::{Phase, Status};
use ferry_crypto::hash::room_token;
use ferry_crypto::{Curve, Pake};
use ferry_transport::{Transport, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Error text sent when key confirmation fails.
pub(crate) const WRONG_CODEPHRASE: &str = "wrong codephrase";

/// Error text sent when the receiver declines the file.
pub(crate) const REFUSING_FILE: &str = "refusing file";

/// AAD for the sealed metadata.
pub(crate) const METADATA_AAD: &[u8] = b"ferry metadata";

/// AAD for the sealed block list.
pub(crate) const BLOCK_LIST_AAD: &[u8] = b"ferry block list";

/// Everything one side of a transfer needs besides its arguments.
pub(crate) struct Context {
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    pub status: Status,
    pub cancel: CancelToken,
}

impl Context {
    /// Run `fut` unless cancellation wins the race.
    pub(crate) async fn or_cancel<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Join the control room for `codephrase`. Returns the channel and our
    /// address as the rendezvous point saw it.
    pub(crate) async fn join_room(&self, codephrase: &str) -> Result<(Control, Option<String>)> {
        self.status.set(Phase::Connecting, "Connecting...");
        let link = self
            .or_cancel(self.connector.control(&room_token(codephrase)))
            .await?;
        let control = Control::new(
            link.transport,
            self.cancel.clone(),
            self.config.timeouts.message,
        );
        Ok((control, link.observed_ip))
    }

    /// Tell the peer how we ended and publish the final status.
    pub(crate) async fn finish<T>(&self, control: &Control, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => control.close().await,
            Err(Error::Cancelled) => {
                control.close().await;
                self.status.set(Phase::Aborted, "Cancelled");
            }
            Err(e) => {
                warn!("Transfer aborted: {}", e);
                control.fail(&wire_reason(e)).await;
                control.shut().await;
                self.status.set(Phase::Aborted, e.to_string());
            }
        }
        result
    }
}

/// Text sent to the peer for a local failure.
fn wire_reason(e: &Error) -> String {
    match e {
        e if e.is_wrong_codephrase() => WRONG_CODEPHRASE.to_string(),
        Error::Protocol(ProtocolError::Refused) => REFUSING_FILE.to_string(),
        e => e.to_string(),
    }
}

/// Control channel with cancellation and per-message deadlines.
pub(crate) struct Control {
    transport: Box<dyn Transport>,
    cancel: CancelToken,
    timeout: Duration,
}

impl Control {
    pub(crate) fn new(transport: Box<dyn Transport>, cancel: CancelToken, timeout: Duration) -> Self {
        Self {
            transport,
            cancel,
            timeout,
        }
    }

    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        debug!("control -> {}", msg.message_type());
        let bytes = msg.to_bytes()?;
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = self.transport.send(&bytes) => res.map_err(peer_gone),
        }
    }

    /// Next message from the peer. `Error` and `Close` from the peer become
    /// errors here.
    pub(crate) async fn recv(&self, waiting_for: &'static str) -> Result<Message> {
        let bytes = tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            res = tokio::time::timeout(self.timeout, self.transport.receive()) => match res {
                Ok(res) => res.map_err(peer_gone)?,
                Err(_) => return Err(ProtocolError::Timeout(waiting_for).into()),
            },
        };
        let msg = Message::from_bytes(&bytes)?;
        debug!("control <- {}", msg.message_type());
        match msg {
            Message::Error { message } => Err(peer_error(message)),
            Message::Close => Err(ProtocolError::PeerClosed.into()),
            msg => Ok(msg),
        }
    }

    /// Tell the peer why we are stopping. Best effort.
    pub(crate) async fn fail(&self, message: &str) {
        let msg = Message::Error {
            message: message.to_string(),
        };
        if let Ok(bytes) = msg.to_bytes() {
            let _ = tokio::time::timeout(CANCEL_GRACE, self.transport.send(&bytes)).await;
        }
    }

    /// Send `Close` and shut the transport. Best effort.
    pub(crate) async fn close(&self) {
        if let Ok(bytes) = Message::Close.to_bytes() {
            let _ = tokio::time::timeout(CANCEL_GRACE, self.transport.send(&bytes)).await;
        }
        self.shut().await;
    }

    /// Shut the transport without a goodbye.
    pub(crate) async fn shut(&self) {
        let _ = self.transport.close().await;
    }
}

fn peer_gone(e: TransportError) -> Error {
    match e {
        TransportError::Closed => ProtocolError::PeerClosed.into(),
        e => e.into(),
    }
}

fn peer_error(message: String) -> Error {
    match message.as_str() {
        WRONG_CODEPHRASE => HandshakeError::WrongCodephrase.into(),
        REFUSING_FILE => ProtocolError::Refused.into(),
        _ => ProtocolError::PeerError(message).into(),
    }
}

pub(crate) fn unexpected(expected: &'static str, got: &Message) -> Error {
    ProtocolError::UnexpectedMessage {
        expected,
        got: got.message_type().to_string(),
    }
    .into()
}

/// Step 0: swap `Init` and check the peer can talk to us. Returns the
/// peer's observed address.
pub(crate) async fn exchange_init(
    control: &Control,
    curve: Curve,
    observed_ip: Option<String>,
) -> Result<Option<String>> {
    control
        .send(&Message::Init {
            curve,
            ip: observed_ip,
            version: PROTOCOL_VERSION.to_string(),
        })
        .await?;
    match control.recv("init").await? {
        Message::Init {
            curve: peer_curve,
            ip,
            version,
        } => {
            if !version_compatible(PROTOCOL_VERSION, &version) {
                return Err(ProtocolError::IncompatibleVersion {
                    local: PROTOCOL_VERSION.to_string(),
                    peer: version,
                }
                .into());
            }
            if peer_curve != curve {
                return Err(HandshakeError::CurveMismatch {
                    local: curve.to_string(),
                    peer: peer_curve.to_string(),
                }
                .into());
            }
            Ok(ip)
        }
        other => Err(unexpected("init", &other)),
    }
}

/// Receive a `Pake` message and feed it to `pake`.
pub(crate) async fn recv_pake(control: &Control, pake: &mut Pake) -> Result<()> {
    match control.recv("pake").await? {
        Message::Pake { state } => Ok(pake.update_base64(&state)?),
        other => Err(unexpected("pake", &other)),
    }
}

pub(crate) async fn expect_ready(control: &Control) -> Result<()> {
    match control.recv("ready").await? {
        Message::Ready => Ok(()),
        other => Err(unexpected("ready", &other)),
    }
}

/// Open `count` data lanes concurrently, ordered by lane index.
pub(crate) async fn open_lanes(
    connector: &Arc<dyn Connector>,
    session_key: &[u8; 32],
    count: u32,
    cancel: &CancelToken,
) -> Result<Vec<Box<dyn Transport>>> {
    let mut set = JoinSet::new();
    for lane in 0..count {
        let connector = Arc::clone(connector);
        let token = ferry_crypto::hash::lane_token(session_key, lane);
        set.spawn(async move {
            let transport = connector.lane(lane, &token).await?;
            Ok::<_, Error>((lane, transport))
        });
    }

    let mut slots: Vec<Option<Box<dyn Transport>>> = (0..count).map(|_| None).collect();
    loop {
        let joined = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        let (lane, transport) = joined.map_err(join_error)??;
        slots[lane as usize] = Some(transport);
    }
    slots
        .into_iter()
        .map(|t| t.ok_or_else(|| ProtocolError::Malformed("lane missing".into()).into()))
        .collect()
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::duplex_pair;

    fn pair() -> (Control, Control) {
        let (a, b) = duplex_pair();
        let timeout = Duration::from_secs(5);
        (
            Control::new(a, CancelToken::new(), timeout),
            Control::new(b, CancelToken::new(), timeout),
        )
    }

    #[tokio::test]
    async fn test_init_exchange() {
        let (a, b) = pair();
        let (ra, rb) = tokio::join!(
            exchange_init(&a, Curve::Ristretto255, Some("10.0.0.1".into())),
            exchange_init(&b, Curve::Ristretto255, None),
        );
        assert_eq!(ra.unwrap(), None);
        assert_eq!(rb.unwrap().as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_init_curve_mismatch() {
        let (a, b) = pair();
        let (ra, rb) = tokio::join!(
            exchange_init(&a, Curve::Ristretto255, None),
            exchange_init(&b, Curve::P256, None),
        );
        assert!(matches!(
            ra,
            Err(Error::Handshake(HandshakeError::CurveMismatch { .. }))
        ));
        assert!(matches!(
            rb,
            Err(Error::Handshake(HandshakeError::CurveMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_peer_error_texts_are_typed() {
        let (a, b) = pair();
        a.fail(WRONG_CODEPHRASE).await;
        assert!(b.recv("pake").await.unwrap_err().is_wrong_codephrase());

        a.fail(REFUSING_FILE).await;
        assert!(matches!(
            b.recv("block_list").await,
            Err(Error::Protocol(ProtocolError::Refused))
        ));

        a.fail("disk full").await;
        assert!(matches!(
            b.recv("hash").await,
            Err(Error::Protocol(ProtocolError::PeerError(m))) if m == "disk full"
        ));

        a.close().await;
        assert!(matches!(
            b.recv("hash").await,
            Err(Error::Protocol(ProtocolError::PeerClosed))
        ));
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (a, _b) = duplex_pair();
        let control = Control::new(a, CancelToken::new(), Duration::from_millis(50));
        assert!(matches!(
            control.recv("init").await,
            Err(Error::Protocol(ProtocolError::Timeout("init")))
        ));
    }

    #[tokio::test]
    async fn test_recv_cancelled() {
        let (a, _b) = duplex_pair();
        let cancel = CancelToken::new();
        let control = Control::new(a, cancel.clone(), Duration::from_secs(30));
        cancel.cancel();
        assert!(matches!(control.recv("init").await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_unexpected_message() {
        let (a, b) = pair();
        a.send(&Message::Ready).await.unwrap();
        let got = b.recv("init").await.unwrap();
        let err = unexpected("init", &got);
        assert!(err.to_string().contains("expected init, got ready"));
    }
}
