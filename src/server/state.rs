use std::sync::Arc;
use std::time::Instant;

use crate::api::OrderStore;
use crate::config::Settings;
use crate::connection_manager::{ConnectionLimits, ConnectionManager};
use crate::dispatch::{DispatchResolver, PolicyRegistry};
use crate::transport::Transport;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub registry: PolicyRegistry,
    pub resolver: Arc<DispatchResolver>,
    pub orders: Arc<OrderStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        connection_manager: Arc<ConnectionManager>,
        registry: PolicyRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let resolver = Arc::new(DispatchResolver::new(
            Arc::new(registry.clone()),
            transport,
            settings.dispatch.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            connection_manager,
            registry,
            resolver,
            orders: Arc::new(OrderStore::new()),
            start_time: Instant::now(),
        }
    }
}

/// Connection manager sized from the WebSocket settings
pub fn connection_manager_for(settings: &Settings) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::with_limits(ConnectionLimits {
        max_connections: settings.websocket.max_connections,
        max_subscriptions_per_connection: settings.websocket.max_subscriptions_per_connection,
    }))
}
