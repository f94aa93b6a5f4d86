use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { channels: Vec<String> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { channels: Vec<String> },
    #[serde(rename = "ping")]
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First message on every connection; clients echo `socket_id` in the
    /// socket-id header of their HTTP requests to avoid receiving their own events.
    #[serde(rename = "connection_established")]
    ConnectionEstablished { socket_id: String },
    #[serde(rename = "event")]
    Event {
        channel: String,
        event: String,
        data: serde_json::Value,
    },
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(channels: Vec<String>) -> Self {
        Self::Subscribed { channels }
    }

    pub fn unsubscribed(channels: Vec<String>) -> Self {
        Self::Unsubscribed { channels }
    }
}

/// Message queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized by the writer
    Raw(ServerMessage),
    /// Serialized once and shared across many connections
    Serialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized(serde_json::to_string(message)?.into()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Serialized(text) => Ok(text.to_string()),
        }
    }
}
