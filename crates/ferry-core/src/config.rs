//! Client configuration

use crate::error::{Error, Result};
use ferry_crypto::Curve;
use ferry_files::TCP_BLOCK_SIZE;
use ferry_relay::DEFAULT_PORTS;
use std::path::PathBuf;
use std::time::Duration;

/// Largest block size a peer may announce. Encoded blocks must fit one
/// data frame.
pub const MAX_BLOCK_SIZE: u32 = 512 * 1024;

/// Most data lanes a transfer may open.
pub const MAX_LANES: usize = 64;

/// Settings shared by `send` and `receive`
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay host name or address
    pub relay_host: String,
    /// WebSocket broker to run the whole transfer through instead of the
    /// lane relay, e.g. `ws://relay.example:9008`
    pub broker_url: Option<String>,
    /// Relay ports: the first carries the control channel, the rest data
    /// lanes (lanes share the first port when it is the only one)
    pub ports: Vec<u16>,
    /// Number of parallel data lanes the sender opens
    pub lanes: usize,
    /// DEFLATE blocks before encryption
    pub compress: bool,
    /// PAKE curve
    pub curve: Curve,
    /// Where received files are written
    pub out_dir: PathBuf,
    /// Name to offer the file under instead of its own
    pub send_as: Option<String>,
    /// Bytes per block
    pub block_size: u32,
    /// Keep files that fail verification
    pub debug: bool,
    /// Timeouts
    pub timeouts: Timeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_host: "127.0.0.1".to_string(),
            broker_url: None,
            ports: DEFAULT_PORTS.to_vec(),
            lanes: 4,
            compress: true,
            curve: Curve::default(),
            out_dir: PathBuf::from("."),
            send_as: None,
            block_size: TCP_BLOCK_SIZE,
            debug: false,
            timeouts: Timeouts::default(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// How long to wait in a relay room for the counterpart
    pub rendezvous: Duration,
    /// How long to wait for any single control message
    pub message: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            rendezvous: Duration::from_secs(10 * 60),
            message: Duration::from_secs(5 * 60),
        }
    }
}

impl ClientConfig {
    /// Check the configuration before starting a transfer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.relay_host.trim().is_empty() {
            return Err(Error::Config("relay host is empty".into()));
        }
        if let Some(url) = &self.broker_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(Error::Config(format!(
                    "broker URL must start with ws:// or wss://, got {url}"
                )));
            }
        }
        if self.ports.is_empty() {
            return Err(Error::Config("at least one relay port is required".into()));
        }
        if self.ports.contains(&0) {
            return Err(Error::Config("relay port 0 is not usable".into()));
        }
        if self.lanes == 0 || self.lanes > MAX_LANES {
            return Err(Error::Config(format!(
                "lanes must be between 1 and {MAX_LANES}, got {}",
                self.lanes
            )));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size must be between 1 and {MAX_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        Ok(())
    }

    /// `host:port` for one relay port, bracketing bare IPv6 hosts.
    #[must_use]
    pub fn relay_addr(&self, port: u16) -> String {
        if self.relay_host.contains(':') && !self.relay_host.starts_with('[') {
            format!("[{}]:{port}", self.relay_host)
        } else {
            format!("{}:{port}", self.relay_host)
        }
    }

    /// Port carrying the control channel.
    #[must_use]
    pub fn control_port(&self) -> u16 {
        self.ports.first().copied().unwrap_or(DEFAULT_PORTS[0])
    }

    /// Port data lane `lane` connects to.
    #[must_use]
    pub fn lane_port(&self, lane: u32) -> u16 {
        match self.ports.len() {
            0 => DEFAULT_PORTS[0],
            1 => self.ports[0],
            n => self.ports[1 + (lane as usize % (n - 1))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control_port(), 9009);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig {
            lanes: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        config.lanes = 2;
        config.ports.clear();
        assert!(config.validate().is_err());

        config.ports = vec![9009];
        config.block_size = MAX_BLOCK_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_broker_url_scheme() {
        let mut config = ClientConfig {
            broker_url: Some("http://relay.example:9008".into()),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
        config.broker_url = Some("ws://relay.example:9008".into());
        assert!(config.validate().is_ok());
        config.broker_url = Some("wss://relay.example".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lane_ports_rotate_over_data_ports() {
        let config = ClientConfig {
            ports: vec![9009, 9010, 9011],
            ..ClientConfig::default()
        };
        assert_eq!(config.lane_port(0), 9010);
        assert_eq!(config.lane_port(1), 9011);
        assert_eq!(config.lane_port(2), 9010);

        let single = ClientConfig {
            ports: vec![7000],
            ..ClientConfig::default()
        };
        assert_eq!(single.lane_port(5), 7000);
    }

    #[test]
    fn test_relay_addr_formats() {
        let v4 = ClientConfig::default();
        assert_eq!(v4.relay_addr(9009), "127.0.0.1:9009");
        let v6 = ClientConfig {
            relay_host: "::1".into(),
            ..ClientConfig::default()
        };
        assert_eq!(v6.relay_addr(9009), "[::1]:9009");
    }
}
