use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;

use super::{RedisEnvelope, Transport, TransportError};
use crate::config::RedisTransportConfig;
use crate::dispatch::Channels;

/// Delay before re-establishing a dropped subscription
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Subscribes to `<prefix>*` and hands every published [`RedisEnvelope`] to
/// the local transport, so this node's WebSocket subscribers receive events
/// dispatched by any node on the redis backend.
pub struct RedisRelay {
    config: RedisTransportConfig,
    local: Arc<dyn Transport>,
    shutdown: broadcast::Receiver<()>,
}

impl RedisRelay {
    pub fn new(
        config: RedisTransportConfig,
        local: Arc<dyn Transport>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            local,
            shutdown,
        }
    }

    fn pattern(&self) -> String {
        format!("{}*", self.config.channel_prefix)
    }

    /// Relay until shutdown, reconnecting after subscription errors
    pub async fn run(mut self) {
        let pattern = self.pattern();
        tracing::info!(pattern = %pattern, "Starting Redis relay");

        loop {
            match self.run_subscription(&pattern).await {
                Ok(()) => {
                    tracing::info!("Redis relay stopped gracefully");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_secs = RECONNECT_DELAY.as_secs(),
                        "Redis relay subscription failed, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }

    async fn run_subscription(&mut self, pattern: &str) -> Result<(), TransportError> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        tracing::info!(pattern = %pattern, "Redis relay subscription established");

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Redis relay received shutdown signal");
                    return Ok(());
                }
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Err(TransportError::Delivery(
                            "Redis message stream ended".to_string(),
                        ));
                    };
                    let channel = msg.get_channel_name().to_string();
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            self.relay(&channel, &payload).await;
                        }
                        Err(e) => {
                            tracing::warn!(channel = %channel, error = %e, "Failed to read Redis message payload");
                        }
                    }
                }
            }
        }
    }

    /// Decode one published message and deliver it locally.
    ///
    /// Returns whether the local transport accepted the event.
    pub async fn relay(&self, redis_channel: &str, payload: &str) -> bool {
        let envelope: RedisEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    channel = %redis_channel,
                    error = %e,
                    "Ignoring Redis message that is not a dispatch envelope"
                );
                return false;
            }
        };

        let channels = Channels::One(envelope.channel);
        match self
            .local
            .trigger(
                &channels,
                &envelope.event,
                &envelope.data,
                envelope.exclude_socket_id.as_deref(),
            )
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    channel = %channels,
                    event = %envelope.event,
                    "Relayed event from Redis"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    channel = %channels,
                    event = %envelope.event,
                    error = %e,
                    "Failed to relay event from Redis"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionManager;
    use crate::transport::LocalTransport;
    use crate::websocket::OutboundMessage;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn relay_over(connection_manager: Arc<ConnectionManager>) -> RedisRelay {
        let (_tx, shutdown) = broadcast::channel(1);
        RedisRelay::new(
            RedisTransportConfig::default(),
            Arc::new(LocalTransport::new(connection_manager)),
            shutdown,
        )
    }

    fn as_json(message: OutboundMessage) -> Value {
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_pattern_uses_prefix() {
        let relay = relay_over(Arc::new(ConnectionManager::new()));
        assert_eq!(relay.pattern(), "realtime:*");
    }

    #[tokio::test]
    async fn test_relay_delivers_envelope_and_honours_exclusion() {
        let connection_manager = Arc::new(ConnectionManager::new());

        let (origin_tx, mut origin_rx) = mpsc::channel(4);
        let origin = connection_manager.register(origin_tx).unwrap();
        connection_manager
            .subscribe_to_channel(origin.id, "orders")
            .await
            .unwrap();

        let (other_tx, mut other_rx) = mpsc::channel(4);
        let other = connection_manager.register(other_tx).unwrap();
        connection_manager
            .subscribe_to_channel(other.id, "orders")
            .await
            .unwrap();

        let relay = relay_over(connection_manager);
        let envelope = RedisEnvelope {
            channel: "orders".to_string(),
            event: "order.created".to_string(),
            data: json!({"id": 5}),
            exclude_socket_id: Some(origin.socket_id()),
        };

        assert!(
            relay
                .relay("realtime:orders", &serde_json::to_string(&envelope).unwrap())
                .await
        );

        let message = as_json(other_rx.try_recv().unwrap());
        assert_eq!(message["type"], "event");
        assert_eq!(message["channel"], "orders");
        assert_eq!(message["event"], "order.created");
        assert_eq!(message["data"], json!({"id": 5}));
        assert!(origin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_ignores_foreign_messages() {
        let relay = relay_over(Arc::new(ConnectionManager::new()));
        assert!(!relay.relay("realtime:orders", "not json").await);
        assert!(!relay.relay("realtime:orders", r#"{"hello": "world"}"#).await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_while_redis_is_unreachable() {
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        let relay = RedisRelay::new(
            RedisTransportConfig {
                url: "redis://127.0.0.1:1".to_string(),
                channel_prefix: "realtime:".to_string(),
            },
            Arc::new(LocalTransport::new(Arc::new(ConnectionManager::new()))),
            shutdown,
        );
        let handle = tokio::spawn(relay.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay should stop")
            .expect("relay should not panic");
    }
}
