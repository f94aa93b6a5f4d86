use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::dispatch::DEFAULT_SOCKET_ID_HEADER;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Dispatch pipeline behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Log every successful dispatch at info level
    #[serde(default)]
    pub debug: bool,
    /// Header read when a handler declares no socket-id policy
    #[serde(default = "default_socket_id_header")]
    pub socket_id_header: String,
    /// Fail startup when a handler declares an event without a channel
    #[serde(default)]
    pub validate_on_startup: bool,
    /// Response bodies larger than this pass through undispatched
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// "local" (in-process WebSocket fan-out) or "redis"
    #[serde(default = "default_transport_backend")]
    pub backend: String,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub redis: RedisTransportConfig,
}

/// Size-based splitting of oversized payloads
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_enabled")]
    pub enabled: bool,
    /// Maximum serialized payload size in bytes before splitting
    #[serde(default = "default_chunking_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisTransportConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix prepended to channel names when publishing
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends heartbeat)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_socket_id_header() -> String {
    DEFAULT_SOCKET_ID_HEADER.to_string()
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_transport_backend() -> String {
    "local".to_string()
}

fn default_chunking_enabled() -> bool {
    true
}

fn default_chunking_limit() -> usize {
    9216 // stays under the 10KB per-event limit of hosted realtime services
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_channel_prefix() -> String {
    "realtime:".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_max_connections() -> usize {
    10000
}

fn default_max_subscriptions() -> usize {
    50
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("transport.backend", "local")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARA__DISPATCH__DEBUG, ARA__TRANSPORT__CHUNKING__LIMIT, etc.
            .add_source(
                Environment::with_prefix("ARA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debug: false,
            socket_id_header: default_socket_id_header(),
            validate_on_startup: false,
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: default_transport_backend(),
            chunking: ChunkingConfig::default(),
            redis: RedisTransportConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: default_chunking_enabled(),
            limit: default_chunking_limit(),
        }
    }
}

impl Default for RedisTransportConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            max_connections: default_max_connections(),
            max_subscriptions_per_connection: default_max_subscriptions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
