// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Dispatch pipeline and delivery
pub mod connection_manager;
pub mod dispatch;
pub mod transport;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
