//! # Pylon Middleware
//!
//! Per-route middleware composition for the Pylon runtime.
//!
//! Middleware is registered once with an integer `order`; the chain is
//! stable-sorted ascending, so the lowest order runs first on the request
//! and last on the response, and equal orders keep registration order.
//! Each middleware decides per route pattern whether it applies, which is
//! how asset routes skip compression and non-API routes skip auth.
//!
//! ```text
//! request ─▶ compression(10) ─▶ rate_limit(20) ─▶ auth(30) ─▶ handler
//! response ◀──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stages
//!
//! | Stage | Default order | Applies to |
//! |-------|---------------|------------|
//! | [`CompressionMiddleware`](stages::CompressionMiddleware) | 10 | every pattern not under a skip prefix |
//! | [`RateLimitMiddleware`](stages::RateLimitMiddleware) | 20 | patterns under the rate-limit prefixes |
//! | [`AuthMiddleware`](stages::AuthMiddleware) | 30 | patterns under the auth prefixes |
//!
//! ## Example
//!
//! ```
//! use pylon_middleware::{full, MiddlewareChain, MiddlewareContext, Request, Response};
//! use std::sync::Arc;
//!
//! let chain = MiddlewareChain::builder().build();
//! let bound = chain.bind(
//!     "/hello",
//!     Arc::new(|_ctx: &mut MiddlewareContext, _req: Request| async {
//!         Response::new(full("hello"))
//!     }),
//! );
//! assert_eq!(bound.pattern(), "/hello");
//! ```

#![doc(html_root_url = "https://docs.rs/pylon-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod context;
pub mod handler;
pub mod middleware;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use chain::{BoundChain, MiddlewareChain, MiddlewareChainBuilder, MiddlewareEntry};
pub use context::MiddlewareContext;
pub use handler::{Handler, Route};
pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next};
pub use types::{empty, full, BoxError, Request, Response, ResponseBody, ResponseExt};
