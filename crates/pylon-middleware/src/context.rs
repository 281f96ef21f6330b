//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries per-request state through the chain:
//! the request ID, the peer address, the route pattern that matched, path
//! parameters, and the identity attached by the auth gate.

use pylon_core::{AuthInfo, RequestId};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Context that flows through the middleware chain.
///
/// # Example
///
/// ```
/// use pylon_core::AuthInfo;
/// use pylon_middleware::context::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_pattern("/api/items/{id}");
/// ctx.set_auth(AuthInfo::new("ab12", "ab12"));
///
/// assert_eq!(ctx.pattern(), "/api/items/{id}");
/// assert_eq!(ctx.auth().unwrap().subject(), "ab12");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    remote_addr: Option<SocketAddr>,
    pattern: String,
    params: HashMap<String, String>,
    auth: Option<AuthInfo>,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context for a request ID taken from the request headers.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            remote_addr: None,
            pattern: String::new(),
            params: HashMap::new(),
            auth: None,
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Address of the connected peer, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Sets the peer address.
    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// Route pattern the request matched.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Sets the matched route pattern.
    pub fn set_pattern(&mut self, pattern: impl Into<String>) {
        self.pattern = pattern.into();
    }

    /// Returns a path parameter captured by the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Replaces the captured path parameters.
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Identity attached by the auth gate.
    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_ref()
    }

    /// Attaches the authenticated identity.
    pub fn set_auth(&mut self, auth: AuthInfo) {
        self.auth = Some(auth);
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_anonymous() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.auth().is_none());
        assert!(ctx.remote_addr().is_none());
        assert_eq!(ctx.pattern(), "");
    }

    #[test]
    fn test_params() {
        let mut ctx = MiddlewareContext::new();
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        ctx.set_params(params);
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("missing"), None);
    }

    #[test]
    fn test_with_request_id() {
        let id = RequestId::new();
        let ctx = MiddlewareContext::with_request_id(id);
        assert_eq!(ctx.request_id(), id);
        assert_ne!(MiddlewareContext::new().request_id(), id);
    }

    #[test]
    fn test_remote_addr() {
        let mut ctx = MiddlewareContext::new();
        let addr: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        ctx.set_remote_addr(addr);
        assert_eq!(ctx.remote_addr(), Some(addr));
    }
}
