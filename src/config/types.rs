//! Configuration types
//!
//! JSON layout uses camelCase keys, e.g.
//! `{"transports": [{"remotePort": "svc:9000", "localPort": ":18080"}]}`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dial timeout used when the config does not set one
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 30;

/// Name of the directory under `$HOME` used when `dir` is empty
const DEFAULT_STATE_DIR: &str = ".port-forwarder";

/// One forwarding rule: connections accepted on `local_port` are relayed to
/// `remote_port` through the overlay.
///
/// Two specs sharing a local address race on bind; keeping local addresses
/// unique is up to whoever writes the config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSpec {
    /// Remote address as understood by the overlay (e.g. "svc:9000")
    pub remote_port: String,
    /// Local listen address (e.g. "127.0.0.1:8080" or ":8080")
    pub local_port: String,
}

impl TransportSpec {
    pub fn new(remote: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            remote_port: remote.into(),
            local_port: local.into(),
        }
    }

    /// Address handed to `TcpListener::bind`
    ///
    /// An empty host (`":8080"`) means every interface: the IPv6 wildcard,
    /// which also accepts IPv4 clients on a dual-stack host.
    pub fn bind_address(&self) -> String {
        match self.local_port.strip_prefix(':') {
            Some(port) => format!("[::]:{}", port),
            None => self.local_port.clone(),
        }
    }

    /// IPv4 wildcard to retry with when an empty-host bind fails on a host
    /// without IPv6
    pub fn fallback_bind_address(&self) -> Option<String> {
        self.local_port
            .strip_prefix(':')
            .map(|port| format!("0.0.0.0:{}", port))
    }
}

/// SSH gateway used as the overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Gateway host name or IP
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user on the gateway
    pub username: String,

    /// Private key; when set, `authkey` is its passphrase instead of a password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Reject gateway host keys that are not already in known_hosts
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

/// Top-level configuration file
///
/// Built once at startup and passed by value; nothing reads it globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwarderConfig {
    /// Identity of this node on the overlay
    #[serde(default)]
    pub hostname: String,

    /// Overlay credential
    #[serde(default)]
    pub authkey: String,

    /// Do not persist anything learned about the overlay (host keys)
    #[serde(default)]
    pub ephemeral: bool,

    /// State directory; empty means `~/.port-forwarder`
    #[serde(default)]
    pub dir: String,

    /// SSH gateway; plain TCP dialing when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    /// Remote dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// Forwarding rules
    #[serde(default)]
    pub transports: Vec<TransportSpec>,
}

impl ForwarderConfig {
    /// Config with plain TCP dialing and the given transports
    pub fn direct(transports: Vec<TransportSpec>) -> Self {
        Self {
            hostname: String::new(),
            authkey: String::new(),
            ephemeral: false,
            dir: String::new(),
            gateway: None,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
            transports,
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        if !self.dir.is_empty() {
            return PathBuf::from(&self.dir);
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_STATE_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    /// Placeholder config written by `--new`
    pub fn template() -> Self {
        Self {
            hostname: "hostname registered on the overlay".into(),
            authkey: "gateway password or key passphrase".into(),
            ephemeral: false,
            dir: "state directory".into(),
            gateway: Some(GatewayConfig {
                host: "gateway.example.com".into(),
                port: default_port(),
                username: "relay".into(),
                key_path: None,
                strict_host_key_checking: false,
            }),
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
            transports: vec![
                TransportSpec::new("Remote:Port", "Local:Port"),
                TransportSpec::new("New", "New"),
            ],
        }
    }
}

/// Split `host:port`, accepting `[v6]:port` and an empty host
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None if host.contains(':') => return None,
        None => host,
    };
    Some((host, port))
}

fn default_port() -> u16 {
    22
}

fn default_dial_timeout() -> u64 {
    DEFAULT_DIAL_TIMEOUT_SECS
}
