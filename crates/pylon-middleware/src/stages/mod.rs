//! Built-in middleware stages.
//!
//! - [`compression`]: adaptive gzip for responses, transparent gunzip for
//!   request bodies
//! - [`rate_limit`]: fixed-window per-client limiter with background sweep
//! - [`auth`]: bearer token gate

pub mod auth;
pub mod compression;
pub mod rate_limit;

pub use auth::{AuthError, AuthMiddleware, StaticTokenProvider, TokenError, TokenValidator};
pub use compression::{CompressionBuilder, CompressionConfig, CompressionMiddleware};
pub use rate_limit::{RateLimitBuilder, RateLimitConfig, RateLimitMiddleware};
