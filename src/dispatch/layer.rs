//! Axum middleware that observes successful handler responses and hands
//! them to the [`DispatchResolver`].
//!
//! Install with `route_layer` so the matched route template is available:
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/orders", post(create_order))
//!     .route_layer(middleware::from_fn_with_state(resolver, dispatch_middleware));
//! ```

use std::sync::Arc;

use axum::{
    body::{self, Body, Bytes, HttpBody},
    extract::{FromRequestParts, MatchedPath, RawPathParams, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::{DispatchResolver, HandlerId, RequestContext, ResponseContext};

/// Observe the handler's response and dispatch its payload in the background.
///
/// The response reaching the client is byte-identical to the handler's
/// output. Handlers without a declared event pass straight through, as do
/// bodies of unknown length or larger than `dispatch.max_payload_bytes`.
pub async fn dispatch_middleware(
    State(resolver): State<Arc<DispatchResolver>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(handler) = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| HandlerId::route(request.method(), path.as_str()))
    else {
        return next.run(request).await;
    };

    let Some(event) = resolver.lookup_event(&handler) else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let params: Vec<(String, String)> = match RawPathParams::from_request_parts(&mut parts, &()).await
    {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let request_ctx = RequestContext::from_parts(&parts, params);

    let response = next.run(Request::from_parts(parts, body)).await;

    // Only successful handler completions are observed
    if !response.status().is_success() {
        tracing::debug!(
            handler = %handler,
            status = %response.status(),
            "Handler did not succeed, skipping dispatch"
        );
        return response;
    }

    let limit = resolver.max_payload_bytes();
    let size = response.body().size_hint();
    if size.upper().map_or(true, |upper| upper > limit as u64) {
        tracing::warn!(
            handler = %handler,
            event = %event,
            size_lower = size.lower(),
            size_upper = ?size.upper(),
            limit,
            "Response body unbounded or above the dispatch limit, passing through undispatched"
        );
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(handler = %handler, error = %e, "Failed to read response body, skipping dispatch");
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let response_ctx = ResponseContext::from(&parts);
    resolver.spawn_dispatch_event(event, request_ctx, response_ctx, handler, payload_from_body(&bytes));

    Response::from_parts(parts, Body::from(bytes))
}

/// JSON bodies dispatch as parsed values, anything else as text
fn payload_from_body(bytes: &Bytes) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
