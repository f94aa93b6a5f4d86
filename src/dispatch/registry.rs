//! Policy registry: the read-only metadata store consulted at dispatch time.
//!
//! Policies are declared per handler at startup through
//! [`PolicyRegistryBuilder`] and frozen into an immutable [`PolicyRegistry`]
//! that any number of concurrent dispatches can read without locking.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    ChannelPolicy, EventDescriptor, GuardPolicy, HandlerId, RequestContext, ResponseContext,
    SocketIdPolicy,
};

/// Read access to the four policies a handler may declare
pub trait MetadataStore: Send + Sync {
    fn event(&self, handler: &HandlerId) -> Option<EventDescriptor>;
    fn channel(&self, handler: &HandlerId) -> Option<ChannelPolicy>;
    fn guard(&self, handler: &HandlerId) -> Option<GuardPolicy>;
    fn socket_id(&self, handler: &HandlerId) -> Option<SocketIdPolicy>;
}

/// Policies declared for one handler
#[derive(Debug, Clone, Default)]
pub struct HandlerPolicies {
    pub event: Option<EventDescriptor>,
    pub channel: Option<ChannelPolicy>,
    pub guard: Option<GuardPolicy>,
    pub socket_id: Option<SocketIdPolicy>,
}

/// Errors reported by the startup validation hook
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Handlers declare an event but no channel: {}", handlers.join(", "))]
    MissingChannel { handlers: Vec<String> },

    #[error("Handlers declare policies but no event: {}", handlers.join(", "))]
    OrphanPolicies { handlers: Vec<String> },
}

/// Immutable handler-to-policies map
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    handlers: Arc<HashMap<HandlerId, HandlerPolicies>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, handler: &HandlerId) -> Option<&HandlerPolicies> {
        self.handlers.get(handler)
    }

    /// Handlers that opted into dispatch, sorted by id
    pub fn opted_in(&self) -> Vec<(&HandlerId, &EventDescriptor)> {
        let mut handlers: Vec<_> = self
            .handlers
            .iter()
            .filter_map(|(id, p)| p.event.as_ref().map(|e| (id, e)))
            .collect();
        handlers.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        handlers
    }

    /// Startup validation: every handler with an event must declare a
    /// channel, and policies without an event are never consulted.
    ///
    /// Dispatch-time behaviour does not depend on this check.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut missing = Vec::new();
        let mut orphans = Vec::new();

        for (id, policies) in self.handlers.iter() {
            match (&policies.event, &policies.channel) {
                (Some(_), None) => missing.push(id.to_string()),
                (None, _) => orphans.push(id.to_string()),
                _ => {}
            }
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(RegistryError::MissingChannel { handlers: missing });
        }
        if !orphans.is_empty() {
            orphans.sort();
            return Err(RegistryError::OrphanPolicies { handlers: orphans });
        }
        Ok(())
    }
}

impl MetadataStore for PolicyRegistry {
    fn event(&self, handler: &HandlerId) -> Option<EventDescriptor> {
        self.handlers.get(handler).and_then(|p| p.event.clone())
    }

    fn channel(&self, handler: &HandlerId) -> Option<ChannelPolicy> {
        self.handlers.get(handler).and_then(|p| p.channel.clone())
    }

    fn guard(&self, handler: &HandlerId) -> Option<GuardPolicy> {
        self.handlers.get(handler).and_then(|p| p.guard.clone())
    }

    fn socket_id(&self, handler: &HandlerId) -> Option<SocketIdPolicy> {
        self.handlers.get(handler).and_then(|p| p.socket_id.clone())
    }
}

/// Collects policy declarations before the registry is frozen.
///
/// Declaring the same policy twice for a handler keeps the last value.
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    handlers: HashMap<HandlerId, HandlerPolicies>,
}

impl PolicyRegistryBuilder {
    /// Start (or continue) declarations for a handler
    pub fn handler(&mut self, id: impl Into<HandlerId>) -> HandlerDeclaration<'_> {
        let policies = self.handlers.entry(id.into()).or_default();
        HandlerDeclaration { policies }
    }

    /// Attach a channel policy to a handler.
    ///
    /// The handler must also declare an event to ever dispatch; this is not
    /// checked here. A missing event simply leaves the channel unused, and a
    /// missing channel is reported when the handler dispatches.
    pub fn declare_channel(&mut self, id: impl Into<HandlerId>, channel: impl Into<ChannelPolicy>) {
        self.handler(id).channel(channel);
    }

    /// Replace every policy of a handler at once
    pub fn register(&mut self, id: impl Into<HandlerId>, policies: HandlerPolicies) {
        self.handlers.insert(id.into(), policies);
    }

    pub fn build(self) -> PolicyRegistry {
        tracing::debug!(handlers = self.handlers.len(), "Policy registry built");
        PolicyRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Fluent declaration of one handler's policies
pub struct HandlerDeclaration<'a> {
    policies: &'a mut HandlerPolicies,
}

impl<'a> HandlerDeclaration<'a> {
    pub fn event(self, name: impl Into<String>) -> Self {
        self.policies.event = Some(EventDescriptor::new(name));
        self
    }

    pub fn channel(self, channel: impl Into<ChannelPolicy>) -> Self {
        self.policies.channel = Some(channel.into());
        self
    }

    pub fn guard<F>(self, f: F) -> Self
    where
        F: Fn(&RequestContext, &ResponseContext, &EventDescriptor) -> bool + Send + Sync + 'static,
    {
        self.policies.guard = Some(GuardPolicy::new(f));
        self
    }

    pub fn socket_id(self, policy: impl Into<SocketIdPolicy>) -> Self {
        self.policies.socket_id = Some(policy.into());
        self
    }
}
