//! Request and response views handed to dispatch policies

use std::collections::HashMap;

use axum::http::{
    header::{HeaderName, HeaderValue},
    request, response, HeaderMap, Method, StatusCode,
};

/// Snapshot of the originating request, captured before the handler runs
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: Method,
    path: String,
    headers: HeaderMap,
    params: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            params: HashMap::new(),
        }
    }

    /// Build from request parts and the matched path parameters
    pub fn from_parts<I, K, V>(parts: &request::Parts, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a path parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup; non UTF-8 values read as absent
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Matched path parameter (e.g. `user_id` for `/users/{user_id}`)
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Status and headers of the response the handler produced
#[derive(Debug, Clone)]
pub struct ResponseContext {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseContext {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl From<&response::Parts> for ResponseContext {
    fn from(parts: &response::Parts) -> Self {
        Self {
            status: parts.status,
            headers: parts.headers.clone(),
        }
    }
}
