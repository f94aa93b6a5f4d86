use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::dispatch::{dispatch_middleware, DispatchResolver};
use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::orders::{cancel_order, create_order, get_order, update_profile};

pub const ORDERS_PATH: &str = "/api/v1/orders";
pub const ORDER_PATH: &str = "/api/v1/orders/{order_id}";
pub const CANCEL_ORDER_PATH: &str = "/api/v1/orders/{order_id}/cancel";
pub const USER_PROFILE_PATH: &str = "/api/v1/users/{user_id}/profile";

pub fn api_routes(resolver: Arc<DispatchResolver>) -> Router<AppState> {
    // Routes are registered with their full path (no `nest`) so the matched
    // path seen by the dispatch middleware is the complete route template.
    let observed = Router::new()
        .route(ORDERS_PATH, post(create_order))
        .route(ORDER_PATH, get(get_order))
        .route(CANCEL_ORDER_PATH, post(cancel_order))
        .route(USER_PROFILE_PATH, put(update_profile))
        .route_layer(middleware::from_fn_with_state(resolver, dispatch_middleware));

    Router::new()
        // Health, stats and metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .merge(observed)
}
