//! Resolution of the requester's own socket id, used for self-exclusion

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::channel::panic_message;
use super::RequestContext;

/// Header read when a handler declares no socket-id policy
pub const DEFAULT_SOCKET_ID_HEADER: &str = "x-pusher-sid";

type SocketIdFn = dyn Fn(&RequestContext) -> Option<String> + Send + Sync;

/// Strategy for finding the originating connection's socket id
#[derive(Clone)]
pub enum SocketIdPolicy {
    /// Read the named request header
    Header(String),
    /// Compute from the request
    Resolver(Arc<SocketIdFn>),
}

impl SocketIdPolicy {
    pub fn header(name: impl Into<String>) -> Self {
        SocketIdPolicy::Header(name.into())
    }

    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        SocketIdPolicy::Resolver(Arc::new(f))
    }
}

impl fmt::Debug for SocketIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketIdPolicy::Header(name) => f.debug_tuple("Header").field(name).finish(),
            SocketIdPolicy::Resolver(_) => f.write_str("Resolver(<fn>)"),
        }
    }
}

impl From<&str> for SocketIdPolicy {
    fn from(name: &str) -> Self {
        SocketIdPolicy::header(name)
    }
}

/// A socket-id resolver that panicked
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Socket id resolver panicked: {0}")]
pub struct SocketIdError(pub String);

/// Resolve the socket id to exclude from delivery.
///
/// A missing or empty value means "exclude nothing". The only error is a
/// panicking resolver closure, which callers also treat as "exclude nothing".
pub fn resolve_socket_id(
    policy: Option<&SocketIdPolicy>,
    request: &RequestContext,
    default_header: &str,
) -> Result<Option<String>, SocketIdError> {
    let socket_id = match policy {
        Some(SocketIdPolicy::Header(name)) => request.header(name).map(str::to_string),
        Some(SocketIdPolicy::Resolver(resolve)) => {
            catch_unwind(AssertUnwindSafe(|| resolve(request)))
                .map_err(|panic| SocketIdError(panic_message(panic.as_ref())))?
        }
        None => request.header(default_header).map(str::to_string),
    };

    Ok(socket_id.filter(|id| !id.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_policy() {
        let req = RequestContext::default().with_header("x-sid", "abc");
        let policy = SocketIdPolicy::from("x-sid");
        assert_eq!(
            resolve_socket_id(Some(&policy), &req, DEFAULT_SOCKET_ID_HEADER),
            Ok(Some("abc".to_string()))
        );
    }

    #[test]
    fn test_default_header_fallback() {
        let req = RequestContext::default().with_header("x-pusher-sid", "xyz");
        assert_eq!(
            resolve_socket_id(None, &req, DEFAULT_SOCKET_ID_HEADER),
            Ok(Some("xyz".to_string()))
        );
    }

    #[test]
    fn test_header_policy_ignores_default_header() {
        let req = RequestContext::default().with_header("x-pusher-sid", "xyz");
        let policy = SocketIdPolicy::header("x-sid");
        assert_eq!(resolve_socket_id(Some(&policy), &req, DEFAULT_SOCKET_ID_HEADER), Ok(None));
    }

    #[test]
    fn test_resolver_policy() {
        let policy = SocketIdPolicy::resolver(|req| req.param("sid").map(|s| format!("sock-{}", s)));
        let req = RequestContext::default().with_param("sid", "7");
        assert_eq!(
            resolve_socket_id(Some(&policy), &req, DEFAULT_SOCKET_ID_HEADER),
            Ok(Some("sock-7".to_string()))
        );
    }

    #[test]
    fn test_missing_or_empty_excludes_nothing() {
        assert_eq!(
            resolve_socket_id(None, &RequestContext::default(), DEFAULT_SOCKET_ID_HEADER),
            Ok(None)
        );
        let req = RequestContext::default().with_header("x-pusher-sid", "");
        assert_eq!(resolve_socket_id(None, &req, DEFAULT_SOCKET_ID_HEADER), Ok(None));
    }

    #[test]
    fn test_panicking_resolver_is_caught() {
        let policy = SocketIdPolicy::resolver(|_| panic!("session store offline"));
        assert_eq!(
            resolve_socket_id(Some(&policy), &RequestContext::default(), DEFAULT_SOCKET_ID_HEADER),
            Err(SocketIdError("session store offline".into()))
        );
    }
}
