//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket subscriber connection
pub struct ConnectionHandle {
    /// Socket id announced to the client and used for self-exclusion
    pub id: Uuid,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    pub subscriptions: RwLock<HashSet<String>>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            subscriptions: RwLock::new(HashSet::new()),
        }
    }

    /// Socket id as sent to the client
    pub fn socket_id(&self) -> String {
        self.id.to_string()
    }

    /// Whether this connection is the one identified by `socket_id`
    pub fn matches_socket_id(&self, socket_id: &str) -> bool {
        Uuid::parse_str(socket_id).is_ok_and(|id| id == self.id)
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity.store(at.timestamp(), Ordering::Relaxed);
    }

    /// Send a ServerMessage (will be serialized when sent to WebSocket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized message (for efficient multi-send scenarios)
    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    /// Get current subscription count
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

/// Error returned when connection limits are exceeded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },

    #[error("Subscription limit exceeded ({current}/{max})")]
    SubscriptionLimitExceeded { current: usize, max: usize },

    #[error("Unknown connection: {0}")]
    UnknownConnection(Uuid),
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_subscriptions_per_connection: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
            max_subscriptions_per_connection: 50,
        }
    }
}
