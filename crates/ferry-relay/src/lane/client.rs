//! Client side of the lane relay handshake.

use super::{PAIRED, PING, PONG};
use crate::error::{RelayError, RelayResult};
use ferry_transport::framing::{read_control, write_control};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

/// Deadline for the TCP connect and the relay banner.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A spliced connection to the counterpart in a room.
#[derive(Debug)]
pub struct LaneConnection {
    /// Raw stream; bytes written here arrive at the counterpart
    pub stream: TcpStream,
    /// Our address as the relay saw it
    pub observed_ip: Option<String>,
}

/// Connect to the relay at `addr`, join room `token` and wait up to
/// `wait` for the counterpart.
///
/// # Errors
///
/// Returns `RelayError::NoCounterpart` if nobody joins in time,
/// `RelayError::InvalidToken` or `RelayError::Refused` if the relay
/// rejects the room, and I/O or transport errors otherwise.
pub async fn connect_lane(addr: &str, token: &str, wait: Duration) -> RelayResult<LaneConnection> {
    let mut stream = open(addr).await?;
    let banner = time::timeout(CONNECT_TIMEOUT, read_control(&mut stream))
        .await
        .map_err(|_| RelayError::Timeout)??;
    let observed_ip = parse_banner(&banner)?;

    write_control(&mut stream, token).await?;
    let reply = time::timeout(wait, read_control(&mut stream))
        .await
        .map_err(|_| RelayError::NoCounterpart)??;
    if reply != PAIRED {
        return Err(RelayError::from_relay_message(&reply));
    }
    debug!("Lane paired via {}", addr);

    Ok(LaneConnection {
        stream,
        observed_ip,
    })
}

/// Check that a relay is up. Returns the round-trip time.
///
/// # Errors
///
/// Returns error if the relay is unreachable or answers unexpectedly.
pub async fn ping(addr: &str, timeout: Duration) -> RelayResult<Duration> {
    let started = Instant::now();
    let exchange = async {
        let mut stream = open(addr).await?;
        parse_banner(&read_control(&mut stream).await?)?;
        write_control(&mut stream, PING).await?;
        let reply = read_control(&mut stream).await?;
        if reply != PONG {
            return Err(RelayError::InvalidMessage(format!(
                "expected pong, got {reply:?}"
            )));
        }
        Ok::<_, RelayError>(())
    };
    time::timeout(timeout, exchange)
        .await
        .map_err(|_| RelayError::Timeout)??;
    Ok(started.elapsed())
}

async fn open(addr: &str) -> RelayResult<TcpStream> {
    let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| RelayError::Timeout)??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// `<banner>|||<ip>` -> the observed IP, if present.
fn parse_banner(banner: &str) -> RelayResult<Option<String>> {
    if banner.starts_with("error") {
        return Err(RelayError::from_relay_message(banner));
    }
    Ok(banner
        .split_once("|||")
        .map(|(_, ip)| ip)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_banner() {
        assert_eq!(
            parse_banner("ok|||10.0.0.7").unwrap().as_deref(),
            Some("10.0.0.7")
        );
        assert_eq!(parse_banner("ok").unwrap(), None);
        assert!(parse_banner("error: busy").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(connect_lane(&addr, "room", Duration::from_millis(100)).await.is_err());
    }
}
