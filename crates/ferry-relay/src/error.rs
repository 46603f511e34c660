//! Relay error types.

use ferry_transport::TransportError;
use thiserror::Error;

/// Errors raised by the relay servers and their clients.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// WebSocket handshake or protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timed out
    #[error("timed out")]
    Timeout,

    /// Nobody joined the room before the wait expired
    #[error("no counterpart joined the room")]
    NoCounterpart,

    /// Room token is empty, too long, or uses forbidden characters
    #[error("invalid room token")]
    InvalidToken,

    /// Channel is unknown to the broker (never opened or already collected)
    #[error("room does not exist")]
    RoomNotFound,

    /// UUID does not belong to either member of the channel
    #[error("uuid '{0}' is invalid")]
    InvalidUuid(String),

    /// Requested role is already taken in the channel
    #[error("channel is already occupied by role {0}")]
    RoleOccupied(u8),

    /// Role is neither 0 nor 1
    #[error("no such role of {0}")]
    InvalidRole(u8),

    /// Message could not be understood
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The relay rejected the request with a reason of its own
    #[error("relay refused: {0}")]
    Refused(String),

    /// Connection ended
    #[error("connection closed")]
    Closed,
}

/// Result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Rebuild a typed error from the text a relay sent back.
    ///
    /// Accepts both the lane relay's `error: <reason>` control frames and
    /// the broker's bare error strings.
    #[must_use]
    pub fn from_relay_message(msg: &str) -> Self {
        let reason = msg.strip_prefix("error:").map_or(msg, str::trim);
        if reason == "room does not exist" {
            return Self::RoomNotFound;
        }
        if reason == "invalid room token" {
            return Self::InvalidToken;
        }
        if let Some(uuid) = reason
            .strip_prefix("uuid '")
            .and_then(|rest| rest.strip_suffix("' is invalid"))
        {
            return Self::InvalidUuid(uuid.to_string());
        }
        if let Some(role) = reason
            .strip_prefix("channel is already occupied by role ")
            .and_then(|r| r.parse().ok())
        {
            return Self::RoleOccupied(role);
        }
        Self::Refused(reason.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match e {
            Error::ConnectionClosed | Error::AlreadyClosed => Self::Closed,
            Error::Io(io) => Self::Io(io),
            other => Self::WebSocket(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_matches_wire_text() {
        assert_eq!(RelayError::RoomNotFound.to_string(), "room does not exist");
        assert_eq!(
            RelayError::InvalidUuid("abc".into()).to_string(),
            "uuid 'abc' is invalid"
        );
        assert_eq!(
            RelayError::RoleOccupied(1).to_string(),
            "channel is already occupied by role 1"
        );
    }

    #[test]
    fn test_from_relay_message() {
        assert!(matches!(
            RelayError::from_relay_message("room does not exist"),
            RelayError::RoomNotFound
        ));
        assert!(matches!(
            RelayError::from_relay_message("error: invalid room token"),
            RelayError::InvalidToken
        ));
        assert!(matches!(
            RelayError::from_relay_message("uuid 'x-y' is invalid"),
            RelayError::InvalidUuid(u) if u == "x-y"
        ));
        assert!(matches!(
            RelayError::from_relay_message("channel is already occupied by role 0"),
            RelayError::RoleOccupied(0)
        ));
        assert!(matches!(
            RelayError::from_relay_message("error: room expired"),
            RelayError::Refused(r) if r == "room expired"
        ));
    }
}
