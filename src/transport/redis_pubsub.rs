use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{Transport, TransportError};
use crate::config::RedisTransportConfig;
use crate::dispatch::Channels;

/// Message published to Redis for each target channel.
///
/// Every node's [`super::RedisRelay`] receives it on `<prefix><channel>` and
/// delivers it to local subscribers, honouring `exclude_socket_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisEnvelope {
    pub channel: String,
    pub event: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_socket_id: Option<String>,
}

/// Publishes events to Redis Pub/Sub
pub struct RedisTransport {
    connection: RedisConnectionManager,
    channel_prefix: String,
}

impl RedisTransport {
    /// Connect to Redis; the connection manager reconnects on its own afterwards
    pub async fn connect(config: &RedisTransportConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = RedisConnectionManager::new(client).await?;

        tracing::info!(url = %config.url, "Connected to Redis for event publishing");

        Ok(Self {
            connection,
            channel_prefix: config.channel_prefix.clone(),
        })
    }

    fn redis_channel(&self, channel: &str) -> String {
        redis_channel_name(&self.channel_prefix, channel)
    }
}

fn redis_channel_name(prefix: &str, channel: &str) -> String {
    format!("{}{}", prefix, channel)
}

#[async_trait]
impl Transport for RedisTransport {
    #[tracing::instrument(
        name = "transport.redis.trigger",
        skip(self, channels, payload, exclude_socket_id),
        fields(channels = %channels)
    )]
    async fn trigger(
        &self,
        channels: &Channels,
        event: &str,
        payload: &serde_json::Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut connection = self.connection.clone();

        for channel in channels.iter() {
            let envelope = RedisEnvelope {
                channel: channel.to_string(),
                event: event.to_string(),
                data: payload.clone(),
                exclude_socket_id: exclude_socket_id.map(str::to_string),
            };
            let message = serde_json::to_string(&envelope)?;
            let receivers: i64 = connection
                .publish(self.redis_channel(channel), message)
                .await?;

            tracing::debug!(
                channel = %channel,
                event = %event,
                receivers = receivers,
                "Published event to Redis"
            );
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
