//! Optional predicate deciding whether a dispatch proceeds

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::channel::panic_message;
use super::{EventDescriptor, RequestContext, ResponseContext};

/// A guard that panicked instead of answering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Guard panicked: {0}")]
pub struct GuardError(pub String);

type GuardFn = dyn Fn(&RequestContext, &ResponseContext, &EventDescriptor) -> bool + Send + Sync;

/// Synchronous guard evaluated once per dispatch
#[derive(Clone)]
pub struct GuardPolicy(Arc<GuardFn>);

impl GuardPolicy {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestContext, &ResponseContext, &EventDescriptor) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn allows(
        &self,
        request: &RequestContext,
        response: &ResponseContext,
        event: &EventDescriptor,
    ) -> Result<bool, GuardError> {
        catch_unwind(AssertUnwindSafe(|| (self.0)(request, response, event)))
            .map_err(|panic| GuardError(panic_message(panic.as_ref())))
    }
}

impl fmt::Debug for GuardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuardPolicy(<fn>)")
    }
}

/// No guard means dispatch is always allowed
pub fn evaluate_guard(
    guard: Option<&GuardPolicy>,
    request: &RequestContext,
    response: &ResponseContext,
    event: &EventDescriptor,
) -> Result<bool, GuardError> {
    guard.map_or(Ok(true), |g| g.allows(request, response, event))
}
