//! # Client Configuration
//!
//! Purpose: Collect every tunable of the client in one serde-friendly struct
//! so deployments can keep it in a JSON file next to the binary.
//!
//! Durations are stored as milliseconds (`0` means "no deadline") and exposed
//! through accessor methods returning `Duration`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::tls::TrustPolicy;

/// Connection, protocol and policy settings for one server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TCP connect deadline in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read deadline in milliseconds.
    pub read_timeout_ms: u64,
    /// Write deadline in milliseconds.
    pub write_timeout_ms: u64,
    /// Capacity of the buffered reader wrapping the stream.
    pub read_buffer_size: usize,
    /// TLS settings.
    pub tls: TlsConfig,
    /// Password sent with AUTH right after connecting.
    pub password: Option<String>,
    /// Route INFO/AUTH to their internal variants.
    pub internal_commands: bool,
    /// Default command token -> replacement token.
    pub command_renames: HashMap<String, String>,
    /// Log every request name at debug level.
    pub log_requests: bool,
    /// Log every reply shape at debug level.
    pub log_replies: bool,
    /// Pool sizing.
    pub pool: PoolConfig,
    /// Forced-reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            read_buffer_size: 8 * 1024,
            tls: TlsConfig::default(),
            password: None,
            internal_commands: false,
            command_renames: HashMap::new(),
            log_requests: true,
            log_replies: true,
            pool: PoolConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Plain-TCP configuration for `host:port` with defaults elsewhere.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        }
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)
            .map_err(|err| ClientError::Config(format!("failed to read {}: {err}", path.display())))?;
        Self::from_json_slice(&raw)
    }

    /// Parses a configuration from JSON bytes.
    pub fn from_json_slice(raw: &[u8]) -> ClientResult<Self> {
        serde_json::from_slice(raw).map_err(|err| ClientError::Config(err.to_string()))
    }

    /// `host:port` label used in logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }
}

/// TLS negotiation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Wrap the TCP stream in TLS.
    pub enabled: bool,
    /// Accept any server certificate (lab use only).
    pub trust_all_certificates: bool,
    /// Name presented for SNI and verification; defaults to `host`.
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn trust_policy(&self) -> TrustPolicy {
        if self.trust_all_certificates {
            TrustPolicy::AcceptAny
        } else {
            TrustPolicy::WebPki
        }
    }
}

/// Bounds for the connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 8,
            max_total: 16,
        }
    }
}

/// Hysteresis windows for forced reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Minimum time between two forced reconnects.
    #[serde(default = "default_min_reconnect_interval_ms")]
    pub min_reconnect_interval_ms: u64,
    /// How long errors must persist before a reconnect is forced.
    #[serde(default = "default_error_persistence_threshold_ms")]
    pub error_persistence_threshold_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            min_reconnect_interval_ms: default_min_reconnect_interval_ms(),
            error_persistence_threshold_ms: default_error_persistence_threshold_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_interval_ms)
    }

    pub fn error_persistence_threshold(&self) -> Duration {
        Duration::from_millis(self.error_persistence_threshold_ms)
    }
}

fn default_min_reconnect_interval_ms() -> u64 {
    60_000
}

fn default_error_persistence_threshold_ms() -> u64 {
    30_000
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}
