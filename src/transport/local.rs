use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use super::{Transport, TransportError};
use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::dispatch::Channels;
use crate::metrics::DeliveryMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Above this many recipients the message is serialized once and shared
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Delivers events to WebSocket subscribers connected to this process
pub struct LocalTransport {
    connection_manager: Arc<ConnectionManager>,
}

impl LocalTransport {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// Send message to a list of connections with bounded parallelism
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: ServerMessage,
    ) -> (usize, usize) {
        if connections.is_empty() {
            return (0, 0);
        }

        let outbound = if connections.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundMessage::preserialized(&message) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
                    OutboundMessage::Raw(message)
                }
            }
        } else {
            OutboundMessage::Raw(message)
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });

            // Drain completed sends when we hit the concurrency limit
            while futures.len() >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => delivered += 1,
                    Some(false) => failed += 1,
                    None => break,
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        (delivered, failed)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    #[tracing::instrument(
        name = "transport.local.trigger",
        skip(self, channels, payload, exclude_socket_id),
        fields(channels = %channels, exclude = ?exclude_socket_id)
    )]
    async fn trigger(
        &self,
        channels: &Channels,
        event: &str,
        payload: &serde_json::Value,
        exclude_socket_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut total_delivered = 0;
        let mut total_failed = 0;

        for channel in channels.iter() {
            let recipients: Vec<_> = self
                .connection_manager
                .get_channel_connections(channel)
                .into_iter()
                .filter(|conn| !exclude_socket_id.is_some_and(|sid| conn.matches_socket_id(sid)))
                .collect();

            let message = ServerMessage::Event {
                channel: channel.to_string(),
                event: event.to_string(),
                data: payload.clone(),
            };
            let (delivered, failed) = self.send_to_connections(&recipients, message).await;
            total_delivered += delivered;
            total_failed += failed;
        }

        DeliveryMetrics::record_delivered(total_delivered as u64);
        DeliveryMetrics::record_failed(total_failed as u64);

        tracing::debug!(
            event = %event,
            delivered = total_delivered,
            failed = total_failed,
            "Delivered event to local subscribers"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn subscriber(
        manager: &ConnectionManager,
        channels: &[&str],
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = manager.register(tx).unwrap();
        for channel in channels {
            manager.subscribe_to_channel(handle.id, channel).await.unwrap();
        }
        (handle, rx)
    }

    fn event_of(msg: OutboundMessage) -> serde_json::Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_delivers_to_subscribers_only() {
        let manager = Arc::new(ConnectionManager::new());
        let (_a, mut rx_a) = subscriber(&manager, &["orders"]).await;
        let (_b, mut rx_b) = subscriber(&manager, &["audit"]).await;
        let transport = LocalTransport::new(manager.clone());

        transport
            .trigger(&"orders".into(), "order.created", &json!({"id": 1}), None)
            .await
            .unwrap();

        let msg = event_of(rx_a.try_recv().unwrap());
        assert_eq!(msg["channel"], "orders");
        assert_eq!(msg["event"], "order.created");
        assert_eq!(msg["data"], json!({"id": 1}));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_excludes_originating_socket() {
        let manager = Arc::new(ConnectionManager::new());
        let (origin, mut rx_origin) = subscriber(&manager, &["orders"]).await;
        let (_other, mut rx_other) = subscriber(&manager, &["orders"]).await;
        let transport = LocalTransport::new(manager.clone());

        let sid = origin.socket_id();
        transport
            .trigger(&"orders".into(), "order.created", &json!({}), Some(sid.as_str()))
            .await
            .unwrap();

        assert!(rx_origin.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_exclusion_excludes_nothing() {
        let manager = Arc::new(ConnectionManager::new());
        let (_a, mut rx_a) = subscriber(&manager, &["orders"]).await;
        let transport = LocalTransport::new(manager.clone());

        transport
            .trigger(&"orders".into(), "order.created", &json!({}), Some("not-a-socket"))
            .await
            .unwrap();

        assert!(rx_a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_multiple_channels_and_large_fanout() {
        let manager = Arc::new(ConnectionManager::new());
        let mut receivers = Vec::new();
        for _ in 0..6 {
            receivers.push(subscriber(&manager, &["orders", "audit"]).await.1);
        }
        let transport = LocalTransport::new(manager.clone());

        transport
            .trigger(&vec!["orders", "audit"].into(), "order.cancelled", &json!({"id": 7}), None)
            .await
            .unwrap();

        for rx in receivers.iter_mut() {
            let first = event_of(rx.try_recv().unwrap());
            let second = event_of(rx.try_recv().unwrap());
            assert_eq!(first["channel"], "orders");
            assert_eq!(second["channel"], "audit");
            assert_eq!(second["data"]["id"], 7);
        }
    }
}
