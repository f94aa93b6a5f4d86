use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ConnectionError, ConnectionHandle, ConnectionLimits, ConnectionStats};
use crate::websocket::OutboundMessage;

/// Manages all active WebSocket subscriber connections
pub struct ConnectionManager {
    /// socket_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// channel_name -> Set<socket_id>
    channel_index: DashMap<String, HashSet<Uuid>>,
    limits: ConnectionLimits,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_limits(ConnectionLimits::default())
    }

    pub fn with_limits(limits: ConnectionLimits) -> Self {
        Self {
            connections: DashMap::new(),
            channel_index: DashMap::new(),
            limits,
        }
    }

    /// Register a new connection
    pub fn register(
        &self,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>, ConnectionError> {
        let current = self.connections.len();
        if current >= self.limits.max_connections {
            return Err(ConnectionError::TotalLimitExceeded {
                current,
                max: self.limits.max_connections,
            });
        }

        let handle = Arc::new(ConnectionHandle::new(sender));
        self.connections.insert(handle.id, handle.clone());

        tracing::info!(socket_id = %handle.id, "Connection registered");

        Ok(handle)
    }

    /// Unregister a connection and drop its subscriptions
    pub async fn unregister(&self, socket_id: Uuid) {
        if let Some((_, handle)) = self.connections.remove(&socket_id) {
            let channels: Vec<String> = handle.subscriptions.read().await.iter().cloned().collect();
            for channel in channels {
                self.remove_from_channel(socket_id, &channel);
            }

            tracing::info!(socket_id = %socket_id, "Connection unregistered");
        }
    }

    /// Subscribe a connection to a channel
    pub async fn subscribe_to_channel(
        &self,
        socket_id: Uuid,
        channel: &str,
    ) -> Result<(), ConnectionError> {
        let handle = self
            .get_connection(socket_id)
            .ok_or(ConnectionError::UnknownConnection(socket_id))?;

        {
            let mut subscriptions = handle.subscriptions.write().await;
            if !subscriptions.contains(channel) {
                let current = subscriptions.len();
                if current >= self.limits.max_subscriptions_per_connection {
                    return Err(ConnectionError::SubscriptionLimitExceeded {
                        current,
                        max: self.limits.max_subscriptions_per_connection,
                    });
                }
                subscriptions.insert(channel.to_string());
            }
        }

        self.channel_index
            .entry(channel.to_string())
            .or_default()
            .insert(socket_id);

        tracing::debug!(socket_id = %socket_id, channel = %channel, "Subscribed to channel");
        Ok(())
    }

    /// Unsubscribe a connection from a channel
    pub async fn unsubscribe_from_channel(&self, socket_id: Uuid, channel: &str) {
        if let Some(handle) = self.get_connection(socket_id) {
            handle.subscriptions.write().await.remove(channel);
            self.remove_from_channel(socket_id, channel);

            tracing::debug!(socket_id = %socket_id, channel = %channel, "Unsubscribed from channel");
        }
    }

    fn remove_from_channel(&self, socket_id: Uuid, channel: &str) {
        if let Some(mut channel_conns) = self.channel_index.get_mut(channel) {
            channel_conns.remove(&socket_id);
            if channel_conns.is_empty() {
                drop(channel_conns);
                self.channel_index.remove_if(channel, |_, conns| conns.is_empty());
            }
        }
    }

    /// Get all connections subscribed to a channel
    pub fn get_channel_connections(&self, channel: &str) -> Vec<Arc<ConnectionHandle>> {
        self.channel_index
            .get(channel)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connections holding at least one channel subscription
    pub fn subscribed_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        let ids: HashSet<Uuid> = self
            .channel_index
            .iter()
            .flat_map(|entry| entry.value().iter().copied().collect::<Vec<_>>())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.get_connection(id))
            .collect()
    }

    /// Drop channel index entries pointing at connections that are gone.
    ///
    /// A subscribe racing an unregister can leave such an entry behind.
    /// Returns the number of entries removed.
    pub fn prune_channel_index(&self) -> usize {
        let mut pruned = 0;
        self.channel_index.retain(|_, socket_ids| {
            let before = socket_ids.len();
            socket_ids.retain(|id| self.connections.contains_key(id));
            pruned += before - socket_ids.len();
            !socket_ids.is_empty()
        });
        pruned
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by socket id
    pub fn get_connection(&self, socket_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&socket_id).map(|h| h.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let channels: HashMap<String, usize> = self
            .channel_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            channels,
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove stale connections and return the count of removed connections
    pub async fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.find_stale_connections(timeout_secs);
        let count = stale.len();

        for socket_id in stale {
            tracing::info!(socket_id = %socket_id, "Removing stale connection due to timeout");
            self.unregister(socket_id).await;
        }

        count
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> mpsc::Sender<OutboundMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_subscribe_and_lookup() {
        let manager = ConnectionManager::new();
        let a = manager.register(sender()).unwrap();
        let b = manager.register(sender()).unwrap();

        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        manager.subscribe_to_channel(b.id, "audit").await.unwrap();

        let orders = manager.get_channel_connections("orders");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, a.id);
        assert_eq!(manager.stats().channels.get("audit"), Some(&1));
    }

    #[tokio::test]
    async fn test_unregister_cleans_channel_index() {
        let manager = ConnectionManager::new();
        let a = manager.register(sender()).unwrap();
        manager.subscribe_to_channel(a.id, "orders").await.unwrap();

        manager.unregister(a.id).await;

        assert!(manager.get_channel_connections("orders").is_empty());
        assert!(manager.stats().channels.is_empty());
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let manager = ConnectionManager::new();
        let a = manager.register(sender()).unwrap();
        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        manager.unsubscribe_from_channel(a.id, "orders").await;

        assert!(manager.get_channel_connections("orders").is_empty());
        assert_eq!(a.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_limits() {
        let manager = ConnectionManager::with_limits(ConnectionLimits {
            max_connections: 1,
            max_subscriptions_per_connection: 1,
        });
        let a = manager.register(sender()).unwrap();
        assert!(matches!(
            manager.register(sender()),
            Err(ConnectionError::TotalLimitExceeded { current: 1, max: 1 })
        ));

        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        // re-subscribing is not a new subscription
        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        assert_eq!(
            manager.subscribe_to_channel(a.id, "audit").await,
            Err(ConnectionError::SubscriptionLimitExceeded { current: 1, max: 1 })
        );
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        assert_eq!(
            manager.subscribe_to_channel(id, "orders").await,
            Err(ConnectionError::UnknownConnection(id))
        );
    }

    #[tokio::test]
    async fn test_subscribed_connections() {
        let manager = ConnectionManager::new();
        let a = manager.register(sender()).unwrap();
        let _idle = manager.register(sender()).unwrap();
        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        manager.subscribe_to_channel(a.id, "audit").await.unwrap();

        let subscribed = manager.subscribed_connections();
        assert_eq!(subscribed.len(), 1);
        assert_eq!(subscribed[0].id, a.id);
    }

    #[tokio::test]
    async fn test_prune_channel_index() {
        let manager = ConnectionManager::new();
        let a = manager.register(sender()).unwrap();
        manager.subscribe_to_channel(a.id, "orders").await.unwrap();
        // orphan entry left by a subscribe that lost a race with unregister
        manager
            .channel_index
            .entry("orders".to_string())
            .or_default()
            .insert(Uuid::new_v4());
        manager
            .channel_index
            .entry("ghost".to_string())
            .or_default()
            .insert(Uuid::new_v4());

        assert_eq!(manager.prune_channel_index(), 2);
        assert_eq!(manager.stats().channels.get("orders"), Some(&1));
        assert!(!manager.stats().channels.contains_key("ghost"));
        assert_eq!(manager.prune_channel_index(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_stale_connections() {
        let manager = ConnectionManager::new();
        let stale = manager.register(sender()).unwrap();
        let fresh = manager.register(sender()).unwrap();
        stale.set_last_activity(chrono::Utc::now() - chrono::Duration::seconds(600));

        assert_eq!(manager.cleanup_stale_connections(120).await, 1);
        assert!(manager.get_connection(stale.id).is_none());
        assert!(manager.get_connection(fresh.id).is_some());
    }
}
