//! Ordered middleware chain.
//!
//! Middleware is registered with an integer order and sorted once, stably,
//! when the chain is built. Binding the chain to a route keeps only the
//! middleware whose [`Middleware::matches`] accepts the route pattern, so
//! the per-request path does no pattern checks.

use crate::context::MiddlewareContext;
use crate::handler::Handler;
use crate::middleware::{Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A registered middleware and its position in the chain.
#[derive(Clone)]
pub struct MiddlewareEntry {
    order: i32,
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareEntry {
    /// Position in the chain; lower runs first.
    pub fn order(&self) -> i32 {
        self.order
    }

    /// The middleware.
    pub fn middleware(&self) -> &Arc<dyn Middleware> {
        &self.middleware
    }
}

impl std::fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("order", &self.order)
            .field("name", &self.middleware.name())
            .finish()
    }
}

/// Builder for [`MiddlewareChain`].
#[derive(Debug, Default)]
pub struct MiddlewareChainBuilder {
    entries: Vec<MiddlewareEntry>,
}

impl MiddlewareChainBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware at `order`.
    #[must_use]
    pub fn register(self, order: i32, middleware: impl Middleware) -> Self {
        self.register_shared(order, Arc::new(middleware))
    }

    /// Registers an already shared middleware at `order`.
    #[must_use]
    pub fn register_shared(mut self, order: i32, middleware: Arc<dyn Middleware>) -> Self {
        tracing::debug!(name = middleware.name(), order, "middleware registered");
        self.entries.push(MiddlewareEntry { order, middleware });
        self
    }

    /// Sorts the registrations and freezes the chain.
    pub fn build(mut self) -> MiddlewareChain {
        // sort_by_key is stable: equal orders keep registration order
        self.entries.sort_by_key(|e| e.order);
        MiddlewareChain {
            entries: self.entries,
        }
    }
}

/// An ordered, immutable set of middleware.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<MiddlewareEntry>,
}

impl MiddlewareChain {
    /// Creates a builder.
    pub fn builder() -> MiddlewareChainBuilder {
        MiddlewareChainBuilder::new()
    }

    /// Registered entries, in execution order.
    pub fn entries(&self) -> &[MiddlewareEntry] {
        &self.entries
    }

    /// Names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.middleware.name()).collect()
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wraps `handler` with every middleware that applies to `pattern`.
    pub fn bind(&self, pattern: &str, handler: Arc<dyn Handler>) -> BoundChain {
        let middlewares = self
            .entries
            .iter()
            .filter(|e| e.middleware.matches(pattern))
            .map(|e| Arc::clone(&e.middleware))
            .collect();

        BoundChain {
            pattern: pattern.to_string(),
            middlewares,
            handler,
        }
    }
}

/// A handler wrapped with the middleware that applies to its pattern.
#[derive(Clone)]
pub struct BoundChain {
    pattern: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

impl BoundChain {
    /// The route pattern this chain was bound for.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Names of the applied middleware, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Runs the request through the middleware and the handler.
    pub async fn call(&self, ctx: &mut MiddlewareContext, request: Request) -> Response {
        let handler = Arc::clone(&self.handler);
        let mut next = Next::handler(move |ctx, req| handler.call(ctx, req));

        for middleware in self.middlewares.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }

        next.run(ctx, request).await
    }
}

impl std::fmt::Debug for BoundChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundChain")
            .field("pattern", &self.pattern)
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}
