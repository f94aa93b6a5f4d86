//! Channel policies and their resolution into concrete channel names.
//!
//! A policy is either static data (one name or an ordered list) or a builder
//! closure evaluated per dispatch. The variant is an explicit enum tag, so a
//! builder can never be mistaken for data or the other way around.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{EventDescriptor, RequestContext};

/// One or more concrete channel names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Channels {
    One(String),
    Many(Vec<String>),
}

impl Channels {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Channels::One(name) => std::slice::from_ref(name),
            Channels::Many(names) => names,
        };
        slice.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            Channels::One(_) => 1,
            Channels::Many(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channels::One(name) => f.write_str(name),
            Channels::Many(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

impl From<&str> for Channels {
    fn from(name: &str) -> Self {
        Channels::One(name.to_string())
    }
}

impl From<String> for Channels {
    fn from(name: String) -> Self {
        Channels::One(name)
    }
}

impl From<Vec<String>> for Channels {
    fn from(names: Vec<String>) -> Self {
        Channels::Many(names)
    }
}

impl From<Vec<&str>> for Channels {
    fn from(names: Vec<&str>) -> Self {
        Channels::Many(names.into_iter().map(str::to_string).collect())
    }
}

/// Failure while computing channels for a dispatch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel builder failed: {0}")]
    Builder(String),

    #[error("Channel builder panicked: {0}")]
    Panicked(String),
}

/// Per-request channel computation
pub type ChannelBuilder =
    Arc<dyn Fn(&RequestContext, &EventDescriptor) -> Result<Channels, ChannelError> + Send + Sync>;

/// Declared strategy for the target channel(s) of an event
#[derive(Clone)]
pub enum ChannelPolicy {
    /// Fixed channel name or fixed ordered list
    Static(Channels),
    /// Computed from the request on every dispatch
    Builder(ChannelBuilder),
}

impl ChannelPolicy {
    pub fn fixed(name: impl Into<String>) -> Self {
        ChannelPolicy::Static(Channels::One(name.into()))
    }

    pub fn list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChannelPolicy::Static(Channels::Many(names.into_iter().map(Into::into).collect()))
    }

    pub fn builder<F, C>(f: F) -> Self
    where
        F: Fn(&RequestContext, &EventDescriptor) -> C + Send + Sync + 'static,
        C: Into<Channels>,
    {
        ChannelPolicy::Builder(Arc::new(move |req, event| Ok(f(req, event).into())))
    }

    pub fn try_builder<F>(f: F) -> Self
    where
        F: Fn(&RequestContext, &EventDescriptor) -> Result<Channels, ChannelError>
            + Send
            + Sync
            + 'static,
    {
        ChannelPolicy::Builder(Arc::new(f))
    }

    pub fn is_builder(&self) -> bool {
        matches!(self, ChannelPolicy::Builder(_))
    }

    /// Resolve to concrete channel names. Static data is returned unchanged;
    /// builders run fresh on every call.
    pub fn resolve(
        &self,
        request: &RequestContext,
        event: &EventDescriptor,
    ) -> Result<Channels, ChannelError> {
        match self {
            ChannelPolicy::Static(channels) => Ok(channels.clone()),
            ChannelPolicy::Builder(build) => {
                match catch_unwind(AssertUnwindSafe(|| build(request, event))) {
                    Ok(result) => result,
                    Err(panic) => Err(ChannelError::Panicked(panic_message(panic.as_ref()))),
                }
            }
        }
    }
}

impl fmt::Debug for ChannelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPolicy::Static(channels) => f.debug_tuple("Static").field(channels).finish(),
            ChannelPolicy::Builder(_) => f.write_str("Builder(<fn>)"),
        }
    }
}

impl From<&str> for ChannelPolicy {
    fn from(name: &str) -> Self {
        ChannelPolicy::fixed(name)
    }
}

impl From<Vec<&str>> for ChannelPolicy {
    fn from(names: Vec<&str>) -> Self {
        ChannelPolicy::list(names)
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
