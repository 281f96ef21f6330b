//! Terminal request handlers and routes.

use crate::context::MiddlewareContext;
use crate::middleware::BoxFuture;
use crate::types::{Request, Response};
use std::future::Future;
use std::sync::Arc;

/// Application handler at the end of a middleware chain.
///
/// The handler reads whatever it needs from the context synchronously and
/// returns a future that owns its data. Any async closure of the form
/// `|ctx: &mut MiddlewareContext, req: Request| async move { .. }` that does
/// not hold on to `ctx` implements this trait.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(&mut MiddlewareContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: &mut MiddlewareContext, request: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(ctx, request))
    }
}

/// A route pattern paired with its handler.
#[derive(Clone)]
pub struct Route {
    pattern: String,
    handler: Arc<dyn Handler>,
}

impl Route {
    /// Creates a route. Patterns use `{name}` for path parameters.
    pub fn new(pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            pattern: pattern.into(),
            handler: Arc::new(handler),
        }
    }

    /// Route pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Shared handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
