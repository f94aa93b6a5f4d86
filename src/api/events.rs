//! Realtime event declarations for the API routes.
//!
//! Handlers are keyed by `METHOD route-template`, the same identity the
//! dispatch middleware derives from the matched route.

use axum::http::Method;

use crate::dispatch::{ChannelPolicy, HandlerId, PolicyRegistry, PolicyRegistryBuilder, RequestContext};

use super::routes::{CANCEL_ORDER_PATH, ORDERS_PATH, USER_PROFILE_PATH};

/// Header that, when present, suppresses the cancellation broadcast
pub const SILENT_HEADER: &str = "x-silent";

/// Header carrying the caller's socket id on profile updates
pub const PROFILE_SOCKET_HEADER: &str = "x-socket-id";

pub fn declare_dispatch_policies(builder: &mut PolicyRegistryBuilder) {
    builder
        .handler(HandlerId::route(&Method::POST, ORDERS_PATH))
        .event("order.created")
        .channel("orders");

    builder
        .handler(HandlerId::route(&Method::POST, CANCEL_ORDER_PATH))
        .event("order.cancelled")
        .channel(vec!["orders", "audit"])
        .guard(|req, _, _| req.header(SILENT_HEADER).is_none());

    builder
        .handler(HandlerId::route(&Method::PUT, USER_PROFILE_PATH))
        .event("profile.updated")
        .channel(ChannelPolicy::builder(|req: &RequestContext, _| {
            format!("user-{}", req.param("user_id").unwrap_or_default())
        }))
        .socket_id(PROFILE_SOCKET_HEADER);
}

/// Registry holding every API declaration
pub fn dispatch_registry() -> PolicyRegistry {
    let mut builder = PolicyRegistry::builder();
    declare_dispatch_policies(&mut builder);
    builder.build()
}
