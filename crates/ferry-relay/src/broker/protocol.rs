//! Broker wire format.
//!
//! Every WebSocket text message, in both directions, is one JSON
//! [`ChannelRecord`]. Clients set exactly one of `open`, `update` or
//! `close`; the broker replies with the merged channel state, personalised
//! with the recipient's own `uuid` and `role`. Broker errors arrive as a
//! record carrying only `error`, followed by a close.

use serde::{Deserialize, Serialize};

/// Role of the sending side.
pub const ROLE_SENDER: u8 = 0;
/// Role of the receiving side.
pub const ROLE_RECEIVER: u8 = 1;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// One broker message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    /// Join (or create) a channel
    #[serde(default, skip_serializing_if = "is_false")]
    pub open: bool,
    /// Merge the supplied fields into the channel
    #[serde(default, skip_serializing_if = "is_false")]
    pub update: bool,
    /// Delete the channel
    #[serde(default, skip_serializing_if = "is_false")]
    pub close: bool,

    /// Channel name; empty on `open` asks the broker to pick one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    /// Membership secret issued on `open`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    /// 0 = sender, 1 = receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<u8>,

    /// Latest PAKE message (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pake: Option<String>,
    /// Relay ports offered for data lanes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    /// PAKE curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
    /// Sealed file metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_file_meta_data: Option<String>,
    /// Both roles are present
    #[serde(default, skip_serializing_if = "is_false")]
    pub transfer_ready: bool,
    /// Receiver confirmed the file
    #[serde(default, skip_serializing_if = "is_false")]
    pub file_received: bool,
    /// Error text, from the broker or from a peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelRecord {
    /// Request to join `channel` (or a fresh one) as `role`.
    #[must_use]
    pub fn open(channel: Option<&str>, role: u8, curve: Option<&str>) -> Self {
        Self {
            open: true,
            channel: channel.unwrap_or_default().to_string(),
            role: Some(role),
            curve: curve.map(str::to_string),
            ..Self::default()
        }
    }

    /// Error-only record.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Whether this is a broker error rather than channel state.
    #[must_use]
    pub fn is_broker_error(&self) -> bool {
        self.error.is_some() && self.uuid.is_empty()
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Short label for logs.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        if self.open {
            "open"
        } else if self.update {
            "update"
        } else if self.close {
            "close"
        } else if self.is_broker_error() {
            "error"
        } else {
            "state"
        }
    }
}
