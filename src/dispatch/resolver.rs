//! Dispatch orchestration.
//!
//! Stages run in a fixed order, each one a short-circuit gate:
//!
//! 1. event presence (absent: silent skip, no further store reads)
//! 2. guard
//! 3. channel policy presence (absent: one warning)
//! 4. channel resolution
//! 5. socket-id resolution
//! 6. one transport call
//!
//! Nothing here can fail the request that produced the payload: every fault
//! ends in a logged [`SkipReason`] or [`DispatchOutcome::Failed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{
    evaluate_guard, resolve_socket_id, ChannelError, Channels, EventDescriptor, GuardError,
    HandlerId, MetadataStore, RequestContext, ResponseContext,
};
use crate::config::DispatchConfig;
use crate::metrics::{DispatchMetrics, TransportMetrics};
use crate::transport::Transport;

/// Fully resolved dispatch handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchTuple {
    pub channels: Channels,
    pub event: String,
    pub payload: serde_json::Value,
    pub exclude_socket_id: Option<String>,
}

/// Why a dispatch did not reach the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Handler declares no event
    NotOptedIn,
    /// Guard returned false
    GuardRejected,
    /// Guard panicked
    GuardFailed(GuardError),
    /// Event declared without a channel policy
    ChannelMissing,
    /// Channel builder failed
    ChannelResolution(ChannelError),
    /// Channel policy resolved to an empty list
    NoChannels,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotOptedIn => "not_opted_in",
            SkipReason::GuardRejected => "guard_rejected",
            SkipReason::GuardFailed(_) => "guard_error",
            SkipReason::ChannelMissing => "channel_missing",
            SkipReason::ChannelResolution(_) => "channel_error",
            SkipReason::NoChannels => "no_channels",
        }
    }
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Dispatched(DispatchTuple),
    Skipped(SkipReason),
    /// The transport rejected the call; the error has been logged
    Failed { tuple: DispatchTuple, error: String },
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }
}

/// Counters for the dispatch pipeline
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub dispatched: AtomicU64,
    pub guard_rejected: AtomicU64,
    pub guard_errors: AtomicU64,
    pub channel_missing: AtomicU64,
    pub channel_errors: AtomicU64,
    pub no_channels: AtomicU64,
    pub socket_id_errors: AtomicU64,
    pub transport_failures: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            guard_rejected: self.guard_rejected.load(Ordering::Relaxed),
            guard_errors: self.guard_errors.load(Ordering::Relaxed),
            channel_missing: self.channel_missing.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            no_channels: self.no_channels.load(Ordering::Relaxed),
            socket_id_errors: self.socket_id_errors.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub guard_rejected: u64,
    pub guard_errors: u64,
    pub channel_missing: u64,
    pub channel_errors: u64,
    pub no_channels: u64,
    pub socket_id_errors: u64,
    pub transport_failures: u64,
}

/// Resolves handler policies into transport calls
pub struct DispatchResolver {
    store: Arc<dyn MetadataStore>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    stats: DispatchStats,
}

impl DispatchResolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            stats: DispatchStats::default(),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Largest response body the middleware buffers for dispatch
    pub fn max_payload_bytes(&self) -> usize {
        self.config.max_payload_bytes
    }

    /// Event presence gate on its own
    pub fn lookup_event(&self, handler: &HandlerId) -> Option<EventDescriptor> {
        self.store.event(handler)
    }

    /// Run every stage except the transport call
    pub fn resolve(
        &self,
        request: &RequestContext,
        response: &ResponseContext,
        handler: &HandlerId,
        payload: serde_json::Value,
    ) -> Result<DispatchTuple, SkipReason> {
        let event = self.lookup_event(handler).ok_or(SkipReason::NotOptedIn)?;
        self.resolve_event(&event, request, response, handler, payload)
    }

    /// Stages 2 to 5 for an event that has already been looked up
    pub fn resolve_event(
        &self,
        event: &EventDescriptor,
        request: &RequestContext,
        response: &ResponseContext,
        handler: &HandlerId,
        payload: serde_json::Value,
    ) -> Result<DispatchTuple, SkipReason> {
        let guard = self.store.guard(handler);
        match evaluate_guard(guard.as_ref(), request, response, event) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(handler = %handler, event = %event, "Guard rejected dispatch");
                self.stats.guard_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(self.skip(SkipReason::GuardRejected));
            }
            Err(e) => {
                tracing::error!(
                    handler = %handler,
                    event = %event,
                    error = %e,
                    "Guard failed, skipping dispatch"
                );
                self.stats.guard_errors.fetch_add(1, Ordering::Relaxed);
                return Err(self.skip(SkipReason::GuardFailed(e)));
            }
        }

        let Some(policy) = self.store.channel(handler) else {
            tracing::warn!(
                handler = %handler,
                event = %event,
                "Channel policy not found for handler at event"
            );
            self.stats.channel_missing.fetch_add(1, Ordering::Relaxed);
            return Err(self.skip(SkipReason::ChannelMissing));
        };

        let channels = match policy.resolve(request, event) {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(
                    handler = %handler,
                    event = %event,
                    error = %e,
                    "Failed to resolve channels, skipping dispatch"
                );
                self.stats.channel_errors.fetch_add(1, Ordering::Relaxed);
                return Err(self.skip(SkipReason::ChannelResolution(e)));
            }
        };

        if channels.is_empty() {
            tracing::warn!(
                handler = %handler,
                event = %event,
                "Channel policy resolved to no channels, skipping dispatch"
            );
            self.stats.no_channels.fetch_add(1, Ordering::Relaxed);
            return Err(self.skip(SkipReason::NoChannels));
        }

        let socket_policy = self.store.socket_id(handler);
        let exclude_socket_id =
            match resolve_socket_id(socket_policy.as_ref(), request, &self.config.socket_id_header) {
                Ok(socket_id) => socket_id,
                Err(e) => {
                    tracing::error!(
                        handler = %handler,
                        event = %event,
                        error = %e,
                        "Socket id resolution failed, excluding nobody"
                    );
                    self.stats.socket_id_errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            };

        Ok(DispatchTuple {
            channels,
            event: event.name.clone(),
            payload,
            exclude_socket_id,
        })
    }

    /// Resolve and deliver. Never returns an error.
    pub async fn dispatch(
        &self,
        request: &RequestContext,
        response: &ResponseContext,
        handler: &HandlerId,
        payload: serde_json::Value,
    ) -> DispatchOutcome {
        match self.lookup_event(handler) {
            Some(event) => {
                self.dispatch_event(event, request, response, handler, payload)
                    .await
            }
            None => DispatchOutcome::Skipped(SkipReason::NotOptedIn),
        }
    }

    /// Resolve and deliver for an event that has already been looked up
    #[tracing::instrument(
        name = "dispatch.event",
        skip_all,
        fields(handler = %handler, event = %event)
    )]
    pub async fn dispatch_event(
        &self,
        event: EventDescriptor,
        request: &RequestContext,
        response: &ResponseContext,
        handler: &HandlerId,
        payload: serde_json::Value,
    ) -> DispatchOutcome {
        match self.resolve_event(&event, request, response, handler, payload) {
            Ok(tuple) => self.deliver(tuple).await,
            Err(reason) => DispatchOutcome::Skipped(reason),
        }
    }

    /// Run `dispatch_event` in the background so the caller never waits on it
    pub fn spawn_dispatch_event(
        self: &Arc<Self>,
        event: EventDescriptor,
        request: RequestContext,
        response: ResponseContext,
        handler: HandlerId,
        payload: serde_json::Value,
    ) -> JoinHandle<DispatchOutcome> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            resolver
                .dispatch_event(event, &request, &response, &handler, payload)
                .await
        })
    }

    async fn deliver(&self, tuple: DispatchTuple) -> DispatchOutcome {
        let transport = self.transport.name();
        let start = Instant::now();
        let result = self
            .transport
            .trigger(
                &tuple.channels,
                &tuple.event,
                &tuple.payload,
                tuple.exclude_socket_id.as_deref(),
            )
            .await;
        TransportMetrics::record_latency(transport, start.elapsed());

        match result {
            Ok(()) => {
                if self.config.debug {
                    tracing::info!(
                        event = %tuple.event,
                        channels = %tuple.channels,
                        "{} has been dispatched to {}",
                        tuple.event,
                        tuple.channels
                    );
                }
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_outcome("dispatched");
                DispatchOutcome::Dispatched(tuple)
            }
            Err(e) => {
                tracing::error!(
                    event = %tuple.event,
                    channels = %tuple.channels,
                    transport = transport,
                    error = %e,
                    "Transport failed to deliver event"
                );
                self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                TransportMetrics::record_failure(transport);
                DispatchMetrics::record_outcome("transport_failed");
                DispatchOutcome::Failed {
                    tuple,
                    error: e.to_string(),
                }
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> SkipReason {
        DispatchMetrics::record_outcome(reason.as_str());
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ChannelPolicy, PolicyRegistry, SocketIdPolicy};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<DispatchTuple>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn trigger(
            &self,
            channels: &Channels,
            event: &str,
            payload: &serde_json::Value,
            exclude_socket_id: Option<&str>,
        ) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(DispatchTuple {
                channels: channels.clone(),
                event: event.to_string(),
                payload: payload.clone(),
                exclude_socket_id: exclude_socket_id.map(str::to_string),
            });
            if self.fail {
                Err(TransportError::Delivery("connection reset".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn resolver(
        registry: PolicyRegistry,
        fail: bool,
    ) -> (Arc<RecordingTransport>, Arc<DispatchResolver>) {
        let transport = Arc::new(RecordingTransport {
            fail,
            ..Default::default()
        });
        let resolver = Arc::new(DispatchResolver::new(
            Arc::new(registry),
            transport.clone(),
            DispatchConfig::default(),
        ));
        (transport, resolver)
    }

    fn request() -> RequestContext {
        RequestContext::new(Method::POST, "/orders")
    }

    #[tokio::test]
    async fn test_static_channel_dispatch() {
        let mut builder = PolicyRegistry::builder();
        builder.handler("create_order").event("order.created").channel("orders");
        let (transport, resolver) = resolver(builder.build(), false);

        let outcome = resolver
            .dispatch(
                &request(),
                &ResponseContext::new(StatusCode::CREATED),
                &"create_order".into(),
                json!({"id": 1}),
            )
            .await;

        let expected = DispatchTuple {
            channels: Channels::from("orders"),
            event: "order.created".to_string(),
            payload: json!({"id": 1}),
            exclude_socket_id: None,
        };
        assert_eq!(outcome, DispatchOutcome::Dispatched(expected.clone()));
        assert_eq!(*transport.calls.lock().unwrap(), vec![expected]);
        assert_eq!(resolver.stats().dispatched, 1);
    }

    #[tokio::test]
    async fn test_not_opted_in_skips_silently() {
        let (transport, resolver) = resolver(PolicyRegistry::builder().build(), false);

        let outcome = resolver
            .dispatch(&request(), &ResponseContext::default(), &"list_orders".into(), json!([]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::NotOptedIn));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_guard_rejection_wins_over_channel() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("h")
            .event("e")
            .channel("orders")
            .guard(|_, _, _| false);
        builder.handler("no_channel").event("e").guard(|_, _, _| false);
        let (_, resolver) = resolver(builder.build(), false);

        for handler in ["h", "no_channel"] {
            assert_eq!(
                resolver.resolve(&request(), &ResponseContext::default(), &handler.into(), json!(null)),
                Err(SkipReason::GuardRejected)
            );
        }
        assert_eq!(resolver.stats().guard_rejected, 2);
        assert_eq!(resolver.stats().channel_missing, 0);
    }

    #[test]
    fn test_missing_channel() {
        let mut builder = PolicyRegistry::builder();
        builder.handler("h").event("e");
        let (_, resolver) = resolver(builder.build(), false);

        assert_eq!(
            resolver.resolve(&request(), &ResponseContext::default(), &"h".into(), json!(null)),
            Err(SkipReason::ChannelMissing)
        );
        assert_eq!(resolver.stats().channel_missing, 1);
    }

    #[test]
    fn test_builder_channel_and_socket_exclusion() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("update_profile")
            .event("profile.updated")
            .channel(ChannelPolicy::builder(|req: &RequestContext, _: &EventDescriptor| {
                format!("user-{}", req.param("userId").unwrap_or_default())
            }))
            .socket_id("x-sid");
        let (_, resolver) = resolver(builder.build(), false);

        let req = request().with_param("userId", "42").with_header("x-sid", "abc");
        let tuple = resolver
            .resolve(&req, &ResponseContext::default(), &"update_profile".into(), json!({}))
            .unwrap();

        assert_eq!(tuple.channels, Channels::from("user-42"));
        assert_eq!(tuple.exclude_socket_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_configured_default_socket_header() {
        let mut builder = PolicyRegistry::builder();
        builder.handler("h").event("e").channel("orders");
        let resolver = DispatchResolver::new(
            Arc::new(builder.build()),
            Arc::new(RecordingTransport::default()),
            DispatchConfig {
                socket_id_header: "x-socket-id".to_string(),
                ..DispatchConfig::default()
            },
        );

        let req = request()
            .with_header("x-socket-id", "mine")
            .with_header("x-pusher-sid", "other");
        let tuple = resolver
            .resolve(&req, &ResponseContext::default(), &"h".into(), json!({}))
            .unwrap();
        assert_eq!(tuple.exclude_socket_id.as_deref(), Some("mine"));
    }

    #[test]
    fn test_failing_builder_skips() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("h")
            .event("e")
            .channel(ChannelPolicy::try_builder(|_, _| {
                Err(ChannelError::Builder("missing tenant".into()))
            }));
        let (_, resolver) = resolver(builder.build(), false);

        assert_eq!(
            resolver.resolve(&request(), &ResponseContext::default(), &"h".into(), json!({})),
            Err(SkipReason::ChannelResolution(ChannelError::Builder(
                "missing tenant".into()
            )))
        );
        assert_eq!(resolver.stats().channel_errors, 1);
    }

    #[test]
    fn test_empty_channel_list_skips() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("h")
            .event("e")
            .channel(ChannelPolicy::list(Vec::<String>::new()));
        let (_, resolver) = resolver(builder.build(), false);

        assert_eq!(
            resolver.resolve(&request(), &ResponseContext::default(), &"h".into(), json!({})),
            Err(SkipReason::NoChannels)
        );
        assert_eq!(resolver.stats().no_channels, 1);
    }

    #[tokio::test]
    async fn test_panicking_guard_skips_with_error() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("h")
            .event("e")
            .channel("orders")
            .guard(|_, _, _| panic!("guard exploded"));
        let (transport, resolver) = resolver(builder.build(), false);

        let outcome = resolver
            .dispatch(&request(), &ResponseContext::default(), &"h".into(), json!({}))
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Skipped(SkipReason::GuardFailed(GuardError("guard exploded".into())))
        );
        assert!(transport.calls.lock().unwrap().is_empty());
        let stats = resolver.stats();
        assert_eq!(stats.guard_errors, 1);
        assert_eq!(stats.guard_rejected, 0);
    }

    #[tokio::test]
    async fn test_panicking_socket_resolver_excludes_nobody() {
        let mut builder = PolicyRegistry::builder();
        builder
            .handler("h")
            .event("e")
            .channel("orders")
            .socket_id(SocketIdPolicy::resolver(|_| panic!("sid lookup exploded")));
        let (transport, resolver) = resolver(builder.build(), false);

        let req = request().with_header("x-pusher-sid", "ignored");
        let outcome = resolver
            .dispatch(&req, &ResponseContext::default(), &"h".into(), json!({"id": 3}))
            .await;

        assert!(outcome.is_dispatched());
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].exclude_socket_id, None);
        assert_eq!(resolver.stats().socket_id_errors, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_absorbed() {
        let mut builder = PolicyRegistry::builder();
        builder.handler("h").event("e").channel("orders");
        let (transport, resolver) = resolver(builder.build(), true);

        let payload = json!({"id": 1});
        let outcome = resolver
            .spawn_dispatch_event(
                EventDescriptor::new("e"),
                request(),
                ResponseContext::default(),
                "h".into(),
                payload.clone(),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { ref error, .. } if error.contains("connection reset")
        ));
        assert!(!outcome.is_dispatched());
        assert_eq!(transport.calls.lock().unwrap().len(), 1);
        assert_eq!(resolver.stats().transport_failures, 1);
        // the caller's value is untouched
        assert_eq!(payload, json!({"id": 1}));
    }

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::GuardRejected.as_str(), "guard_rejected");
        assert_eq!(SkipReason::ChannelMissing.as_str(), "channel_missing");
        assert_eq!(SkipReason::NoChannels.as_str(), "no_channels");
        assert_eq!(SkipReason::GuardFailed(GuardError("x".into())).as_str(), "guard_error");
    }
}
