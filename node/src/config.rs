//! Node configuration with TOML file support.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use witness_network::TransportConfig;
use witness_protocol::codec::MAX_FRAME_SIZE;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a witness node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Actor name this node signs votes and issues as.
    #[serde(default = "default_name")]
    pub name: String,

    /// Address the P2P listener binds. Port 0 picks a free port.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Holds `node.key`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Peers dialed on startup, as `host:port`.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Failed connects tolerated before an endpoint is abandoned.
    #[serde(default = "default_max_dial_retries")]
    pub max_dial_retries: u32,

    #[serde(default = "default_dial_backoff_ms")]
    pub dial_backoff_ms: u64,

    #[serde(default = "default_max_dial_backoff_ms")]
    pub max_dial_backoff_ms: u64,

    /// Largest accepted frame payload, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Lifetime of messages that do not set their own expiration.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,

    /// Scan interval of the election expiration timer.
    #[serde(default = "default_election_tick_ms")]
    pub election_tick_ms: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_name() -> String {
    "witness".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7400))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./witness_data")
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_dial_retries() -> u32 {
    5
}

fn default_dial_backoff_ms() -> u64 {
    500
}

fn default_max_dial_backoff_ms() -> u64 {
    30_000
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_outbound_queue_capacity() -> usize {
    1024
}

fn default_message_ttl_secs() -> u64 {
    60
}

fn default_election_tick_ms() -> u64 {
    1_000
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Transport knobs for the network layer.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_dial_retries: self.max_dial_retries,
            dial_backoff: Duration::from_millis(self.dial_backoff_ms),
            max_dial_backoff: Duration::from_millis(self.max_dial_backoff_ms),
            max_frame_size: self.max_frame_size,
            outbound_queue_capacity: self.outbound_queue_capacity,
        }
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn election_tick(&self) -> Duration {
        Duration::from_millis(self.election_tick_ms.max(1))
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("node.key")
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    /// Parse `bootstrap_peers` into socket addresses.
    pub fn bootstrap_addrs(&self) -> Result<Vec<SocketAddr>, NodeError> {
        self.bootstrap_peers
            .iter()
            .map(|peer| {
                peer.trim()
                    .parse::<SocketAddr>()
                    .map_err(|e| NodeError::Config(format!("bootstrap peer {peer:?}: {e}")))
            })
            .collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            bootstrap_peers: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_dial_retries: default_max_dial_retries(),
            dial_backoff_ms: default_dial_backoff_ms(),
            max_dial_backoff_ms: default_max_dial_backoff_ms(),
            max_frame_size: default_max_frame_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            message_ttl_secs: default_message_ttl_secs(),
            election_tick_ms: default_election_tick_ms(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
