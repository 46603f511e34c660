//! # TCP Lane Relay
//!
//! Pairs two TCP connections that present the same room token on the same
//! port, then forwards bytes between them verbatim.
//!
//! ## Handshake
//!
//! All handshake messages are 256-byte `:`-padded control frames.
//!
//! ```text
//! relay  -> client   ok|||<client ip>
//! client -> relay    <room token>          (or "ping")
//! relay  -> client   paired                (or "pong", or "error: ...")
//! ```
//!
//! After `paired` the relay is a dumb pipe: it never looks at the bytes.
//! A room that has only one member for longer than the room TTL is
//! dropped and its member receives `error: room expired`.

pub mod client;
pub mod server;

pub use client::{LaneConnection, connect_lane, ping};
pub use server::{LaneRelay, LaneRelayConfig};

/// First word of the relay banner.
pub const BANNER: &str = "ok";
/// Liveness probe sent in place of a room token.
pub const PING: &str = "ping";
/// Reply to [`PING`].
pub const PONG: &str = "pong";
/// Sent to both members once a room is full.
pub const PAIRED: &str = "paired";
/// Sent for an unusable room token.
pub const ERR_INVALID_TOKEN: &str = "error: invalid room token";
/// Sent when a half-filled room times out.
pub const ERR_ROOM_EXPIRED: &str = "error: room expired";

/// Longest accepted room token.
pub const MAX_TOKEN_LEN: usize = 128;

/// Room tokens are 1 to [`MAX_TOKEN_LEN`] characters of `[A-Za-z0-9_-]`.
#[must_use]
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_token_validation() {
        assert!(is_valid_token("0f3a9c"));
        assert!(is_valid_token("room-1_b"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("has space"));
        assert!(!is_valid_token(PING.repeat(40).as_str()));
    }

    proptest! {
        #[test]
        fn prop_hex_tokens_valid(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
            let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            prop_assert!(is_valid_token(&token));
        }

        #[test]
        fn prop_colon_never_valid(prefix in "[a-z]{0,10}", suffix in "[a-z]{0,10}") {
            let token = format!("{prefix}:{suffix}");
            prop_assert!(!is_valid_token(&token));
        }
    }
}
