//! Configuration management for the bridge.
//!
//! Configuration is layered from multiple sources:
//! 1. Default configuration (embedded in the library)
//! 2. System-wide configuration file (`/etc/leapbrush/bridge.toml`)
//! 3. An explicit file passed to `leapbrush_init` or `--config`
//! 4. Environment variables (prefixed with `LEAPBRUSH_`, sections separated by `__`)
//!
//! Later sources override earlier ones.
//!
//! # Environment Variables
//!
//! - `LEAPBRUSH_SECURE_PREFIX` - Address prefix selecting TLS
//! - `LEAPBRUSH_CHANNEL__REQUEST_TIMEOUT_MS` - Per-call deadline (0 disables)
//! - `LEAPBRUSH_CHANNEL__TLS_CA_PATH` - PEM bundle replacing the system roots
//! - `LEAPBRUSH_PAYLOAD__STRICT` - Reject malformed request payloads
//! - `LEAPBRUSH_LOGGING__FILTER` - tracing filter directives

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const SYSTEM_CONFIG: &str = "/etc/leapbrush/bridge.toml";

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address prefix that selects an encrypted channel
    #[serde(default = "default_secure_prefix")]
    pub secure_prefix: String,
    /// Runtime driving the async RPC stack
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Channel and per-call settings
    #[serde(default)]
    pub channel: ChannelSettings,
    /// Streaming call settings
    #[serde(default)]
    pub stream: StreamSettings,
    /// Request payload handling
    #[serde(default)]
    pub payload: PayloadSettings,
    /// Diagnostics output
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Worker threads (defaults to the number of CPUs)
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-call deadline in milliseconds, 0 for none
    #[serde(default)]
    pub request_timeout_ms: u64,
    /// TCP keepalive interval in milliseconds, 0 to disable
    #[serde(default = "default_tcp_keepalive_ms")]
    pub tcp_keepalive_ms: u64,
    /// PEM CA bundle used instead of the system roots for TLS channels
    #[serde(default)]
    pub tls_ca_path: Option<PathBuf>,
    /// Domain name checked against the server certificate
    #[serde(default)]
    pub tls_domain: Option<String>,
    /// Metadata attached to every call
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: 0,
            tcp_keepalive_ms: default_tcp_keepalive_ms(),
            tls_ca_path: None,
            tls_domain: None,
            metadata: HashMap::new(),
        }
    }
}

impl ChannelSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn tcp_keepalive(&self) -> Option<Duration> {
        (self.tcp_keepalive_ms > 0).then(|| Duration::from_millis(self.tcp_keepalive_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Messages a write-stream may queue ahead of the transport
    #[serde(default = "default_write_queue_depth")]
    pub write_queue_depth: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            write_queue_depth: default_write_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadSettings {
    /// Reject request bytes that are not valid protobuf. When false, a
    /// malformed request is replaced by the empty message.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            strict: default_strict(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// tracing-subscriber filter directives, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            secure_prefix: default_secure_prefix(),
            runtime: RuntimeSettings::default(),
            channel: ChannelSettings::default(),
            stream: StreamSettings::default(),
            payload: PayloadSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from all sources
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(Path::new(SYSTEM_CONFIG)).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LEAPBRUSH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: BridgeConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load only the embedded defaults, ignoring files and environment
    pub fn embedded() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

fn default_secure_prefix() -> String {
    "ssl://".to_string()
}

fn default_thread_name() -> String {
    "leapbrush-rpc".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_tcp_keepalive_ms() -> u64 {
    30_000
}

fn default_write_queue_depth() -> usize {
    1
}

fn default_strict() -> bool {
    true
}

fn default_log_filter() -> String {
    "leapbrush_bridge=info".to_string()
}
