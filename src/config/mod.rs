mod settings;

pub use settings::{
    ChunkingConfig, DispatchConfig, LoggingConfig, RedisTransportConfig, ServerConfig, Settings,
    TransportConfig, WebSocketConfig,
};
