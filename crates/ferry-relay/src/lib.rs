//! # Ferry Relay
//!
//! Rendezvous infrastructure for Ferry transfers. Peers behind NAT never
//! talk directly; they meet at a relay that they both can reach.
//!
//! This crate provides:
//! - [`lane`]: the TCP relay that pairs connections by room token and
//!   splices them into byte pipes (control channel and data lanes)
//! - [`broker`]: a WebSocket channel broker for exchanging session state,
//!   which also pairs WebSocket pipes for transfers that cannot use raw TCP
//! - [`relay`]: run the lane relay on a set of ports
//!
//! The relay never sees plaintext: everything past the handshake is
//! encrypted end to end by the peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod error;
pub mod lane;

pub use broker::{
    Broker, BrokerClient, BrokerConfig, ChannelRecord, PipeConnection, connect_pipe,
};
pub use error::{RelayError, RelayResult};
pub use lane::{LaneConnection, LaneRelay, LaneRelayConfig, connect_lane, ping};

/// Default relay host.
pub const DEFAULT_RELAY_HOST: &str = "0.0.0.0";

/// Default relay ports: the first carries the control channel, the rest
/// carry data lanes.
pub const DEFAULT_PORTS: [u16; 5] = [9009, 9010, 9011, 9012, 9013];

/// Run a lane relay on `host` for every port in `ports` until all
/// listeners stop.
///
/// # Errors
///
/// Returns error if no ports are given or a port cannot be bound.
pub async fn relay(host: &str, ports: &[u16]) -> RelayResult<()> {
    relay_with_config(host, ports, LaneRelayConfig::default()).await
}

/// [`relay`] with a custom configuration.
///
/// # Errors
///
/// Returns error if no ports are given or a port cannot be bound.
pub async fn relay_with_config(
    host: &str,
    ports: &[u16],
    config: LaneRelayConfig,
) -> RelayResult<()> {
    if ports.is_empty() {
        return Err(RelayError::InvalidMessage("no relay ports given".into()));
    }
    LaneRelay::bind_with_config(host, ports, config)
        .await?
        .run()
        .await
}
