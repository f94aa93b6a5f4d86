//! Handler identity and event descriptors

use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// Identity of a request handler in the policy registry.
///
/// Routed handlers are identified by method and matched route pattern,
/// e.g. `POST /api/v1/orders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for a routed handler
    pub fn route(method: &Method, path: &str) -> Self {
        Self(format!("{} {}", method, path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Real-time event a handler emits once it has produced a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Event name (e.g., "order.created")
    pub name: String,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_handler_id() {
        let id = HandlerId::route(&Method::POST, "/api/v1/orders");
        assert_eq!(id.as_str(), "POST /api/v1/orders");
        assert_eq!(id, HandlerId::from("POST /api/v1/orders"));
    }

    #[test]
    fn test_event_descriptor_display() {
        let event = EventDescriptor::new("order.created");
        assert_eq!(event.to_string(), "order.created");
        assert_eq!(event.name(), "order.created");
    }
}
