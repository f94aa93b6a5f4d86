//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::dispatch::DispatchStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub transport: String,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub dispatch: DispatchStatsSnapshot,
    pub transport: String,
    pub opted_in_handlers: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        transport: state.resolver.transport_name().to_string(),
        connections: state.connection_manager.connection_count(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.connection_manager.stats(),
        dispatch: state.resolver.stats(),
        transport: state.resolver.transport_name().to_string(),
        opted_in_handlers: state
            .registry
            .opted_in()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect(),
    })
}
