//! Configuration file for the Ferry CLI.

use ferry_core::config::{MAX_BLOCK_SIZE, MAX_LANES};
use ferry_core::{ClientConfig, Timeouts};
use ferry_crypto::Curve;
use ferry_relay::{BrokerConfig, DEFAULT_PORTS, DEFAULT_RELAY_HOST, LaneRelayConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay the client talks to
    #[serde(default)]
    pub relay: RelayConfig,
    /// Transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Settings for `ferry relay`
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay the client connects to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay host name or address
    #[serde(default = "default_relay_address")]
    pub address: String,
    /// Relay ports; the first carries the control channel
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// WebSocket broker URL; when set, transfers run over it instead of
    /// the lane ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Parallel data lanes when sending
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Compress blocks
    #[serde(default = "default_true")]
    pub compress: bool,
    /// PAKE curve (`ristretto255` or `p256`)
    #[serde(default = "default_curve")]
    pub curve: String,
    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Directory received files land in
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Seconds to wait for the other side to show up
    #[serde(default = "default_rendezvous_secs")]
    pub rendezvous_timeout_secs: u64,
    /// Seconds to wait for any one control message
    #[serde(default = "default_message_secs")]
    pub message_timeout_secs: u64,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_host")]
    pub host: String,
    /// Lane ports to listen on
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// WebSocket broker address, e.g. `0.0.0.0:9020`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_addr: Option<String>,
    /// Seconds an unpaired room survives
    #[serde(default = "default_room_ttl_secs")]
    pub room_ttl_secs: u64,
    /// Banner sent to new connections
    #[serde(default = "default_banner")]
    pub banner: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_relay_address() -> String {
    "127.0.0.1".to_string()
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn default_lanes() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_curve() -> String {
    Curve::default().to_string()
}

fn default_block_size() -> u32 {
    ClientConfig::default().block_size
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_rendezvous_secs() -> u64 {
    10 * 60
}

fn default_message_secs() -> u64 {
    5 * 60
}

fn default_listen_host() -> String {
    DEFAULT_RELAY_HOST.to_string()
}

fn default_room_ttl_secs() -> u64 {
    10 * 60
}

fn default_banner() -> String {
    LaneRelayConfig::default().banner
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_relay_address(),
            ports: default_ports(),
            broker_url: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            compress: true,
            curve: default_curve(),
            block_size: default_block_size(),
            out_dir: default_out_dir(),
            rendezvous_timeout_secs: default_rendezvous_secs(),
            message_timeout_secs: default_message_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            ports: default_ports(),
            broker_addr: None,
            room_ttl_secs: default_room_ttl_secs(),
            banner: default_banner(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ferry/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            // A read-only home is not fatal; run with defaults.
            if let Err(e) = config.save(&path) {
                tracing::debug!("Not writing default config to {}: {}", path.display(), e);
            }
            Ok(config)
        }
    }

    /// Parsed PAKE curve
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown curve name.
    pub fn curve(&self) -> anyhow::Result<Curve> {
        self.transfer
            .curve
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid curve: {}", self.transfer.curve))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host(&self.relay.address, "Relay address")?;
        validate_ports(&self.relay.ports, "Relay ports")?;
        if let Some(url) = &self.relay.broker_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                anyhow::bail!("Broker URL '{url}' must start with ws:// or wss://");
            }
        }
        validate_host(&self.server.host, "Server host")?;
        validate_ports(&self.server.ports, "Server ports")?;
        if let Some(addr) = &self.server.broker_addr {
            addr.parse::<std::net::SocketAddr>()
                .map_err(|_| anyhow::anyhow!("Broker address '{addr}' is not host:port"))?;
        }

        if self.transfer.lanes == 0 || self.transfer.lanes > MAX_LANES {
            anyhow::bail!("Lanes must be between 1 and {MAX_LANES}");
        }
        if self.transfer.block_size == 0 || self.transfer.block_size > MAX_BLOCK_SIZE {
            anyhow::bail!("Block size must be between 1 and {MAX_BLOCK_SIZE}");
        }
        self.curve()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Client settings for a transfer.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown curve name.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig {
            relay_host: self.relay.address.clone(),
            broker_url: self.relay.broker_url.clone(),
            ports: self.relay.ports.clone(),
            lanes: self.transfer.lanes,
            compress: self.transfer.compress,
            curve: self.curve()?,
            out_dir: self.transfer.out_dir.clone(),
            send_as: None,
            block_size: self.transfer.block_size,
            debug: false,
            timeouts: Timeouts {
                rendezvous: Duration::from_secs(self.transfer.rendezvous_timeout_secs),
                message: Duration::from_secs(self.transfer.message_timeout_secs),
            },
        })
    }

    /// Lane relay settings for `ferry relay`.
    #[must_use]
    pub fn lane_relay_config(&self) -> LaneRelayConfig {
        LaneRelayConfig {
            room_ttl: Duration::from_secs(self.server.room_ttl_secs),
            banner: self.server.banner.clone(),
            ..LaneRelayConfig::default()
        }
    }

    /// Broker settings for `ferry relay`.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            channel_ttl: Duration::from_secs(self.server.room_ttl_secs),
            ..BrokerConfig::default()
        }
    }
}

fn validate_host(host: &str, name: &str) -> anyhow::Result<()> {
    if host.trim().is_empty() {
        anyhow::bail!("{name} is empty");
    }
    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{host}' contains invalid characters");
    }
    Ok(())
}

fn validate_ports(ports: &[u16], name: &str) -> anyhow::Result<()> {
    if ports.is_empty() {
        anyhow::bail!("{name}: at least one port is required");
    }
    if ports.contains(&0) {
        anyhow::bail!("{name}: port 0 is not usable");
    }
    Ok(())
}
