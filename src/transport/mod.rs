//! Real-time transports that deliver resolved dispatches.
//!
//! # Transport Architecture
//!
//! - `LocalTransport`: fans events out to WebSocket subscribers of this process
//! - `RedisTransport`: publishes events to Redis Pub/Sub for every node
//! - `RedisRelay`: subscribes to those publications and delivers them through
//!   this node's `LocalTransport`
//! - `ChunkingTransport`: decorator splitting oversized payloads into pieces
//!
//! Use `create_transport()` to build the configured stack.

mod chunking;
mod local;
mod redis_pubsub;
mod redis_relay;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TransportConfig;
use crate::connection_manager::ConnectionManager;
use crate::dispatch::Channels;

pub use chunking::{ChunkingTransport, CHUNKED_EVENT_PREFIX};
pub use local::LocalTransport;
pub use redis_pubsub::{RedisEnvelope, RedisTransport};
pub use redis_relay::RedisRelay;

/// Errors raised while delivering an event
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Client that delivers one logical event to one or more channels
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` as `event` on every channel, skipping the connection
    /// identified by `exclude_socket_id` when given.
    async fn trigger(
        &self,
        channels: &Channels,
        event: &str,
        payload: &serde_json::Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Short transport name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Create the transport stack based on configuration.
///
/// - `"redis"`: Returns a `RedisTransport` connected to `transport.redis.url`
/// - `"local"` (default): Returns a `LocalTransport` over the connection manager
///
/// The result is wrapped in a `ChunkingTransport` when chunking is enabled.
pub async fn create_transport(
    config: &TransportConfig,
    connection_manager: Arc<ConnectionManager>,
) -> Result<Arc<dyn Transport>, TransportError> {
    let inner: Arc<dyn Transport> = match config.backend.as_str() {
        "redis" => {
            tracing::info!(
                backend = "redis",
                prefix = %config.redis.channel_prefix,
                "Creating Redis transport"
            );
            Arc::new(RedisTransport::connect(&config.redis).await?)
        }
        "local" => {
            tracing::info!(backend = "local", "Creating local transport");
            Arc::new(LocalTransport::new(connection_manager))
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown transport backend, falling back to local"
            );
            Arc::new(LocalTransport::new(connection_manager))
        }
    };

    if config.chunking.enabled {
        tracing::info!(limit = config.chunking.limit, "Payload chunking enabled");
        Ok(Arc::new(ChunkingTransport::new(inner, config.chunking)))
    } else {
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    #[tokio::test]
    async fn test_create_local_transport_with_chunking() {
        let config = TransportConfig::default();
        let transport = create_transport(&config, Arc::new(ConnectionManager::new()))
            .await
            .unwrap();
        assert_eq!(transport.name(), "chunking");
    }

    #[tokio::test]
    async fn test_create_local_transport_without_chunking() {
        let config = TransportConfig {
            backend: "local".to_string(),
            chunking: ChunkingConfig {
                enabled: false,
                limit: 9216,
            },
            ..TransportConfig::default()
        };
        let transport = create_transport(&config, Arc::new(ConnectionManager::new()))
            .await
            .unwrap();
        assert_eq!(transport.name(), "local");
    }

    #[tokio::test]
    async fn test_unknown_backend_falls_back_to_local() {
        let config = TransportConfig {
            backend: "carrier-pigeon".to_string(),
            chunking: ChunkingConfig {
                enabled: false,
                limit: 9216,
            },
            ..TransportConfig::default()
        };
        let transport = create_transport(&config, Arc::new(ConnectionManager::new()))
            .await
            .unwrap();
        assert_eq!(transport.name(), "local");
    }
}
