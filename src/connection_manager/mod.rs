//! Local WebSocket subscriber connections, indexed by socket id and channel.

mod registry;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::ConnectionStats;
pub use types::{ConnectionError, ConnectionHandle, ConnectionLimits};
