//! API layer - HTTP endpoint handlers and their realtime event declarations.

mod events;
mod health;
mod metrics;
mod orders;
mod routes;

pub use events::{
    declare_dispatch_policies, dispatch_registry, PROFILE_SOCKET_HEADER, SILENT_HEADER,
};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use orders::{
    cancel_order, create_order, get_order, update_profile, CreateOrderRequest, Order, OrderStatus,
    OrderStore, Profile, UpdateProfileRequest,
};
pub use routes::{api_routes, CANCEL_ORDER_PATH, ORDERS_PATH, ORDER_PATH, USER_PROFILE_PATH};
