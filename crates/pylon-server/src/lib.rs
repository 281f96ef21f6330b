//! # Pylon Server
//!
//! HTTP servers and the orchestrator that runs them as a group.
//!
//! - [`Server`] / [`HttpServer`]: bind, serve, shutdown of one listener
//! - [`HttpServerFactory`]: builds an `HttpServer` from configuration, routes
//!   and a middleware chain
//! - [`Orchestrator`]: binds every server, serves the ones that bound, and
//!   shuts all of them down when any fails or a stop signal arrives
//! - [`Lifecycle`]: startup and shutdown hooks around a run
//!
//! ## Example
//!
//! ```rust,no_run
//! use pylon_core::Runtime;
//! use pylon_server::{HttpServerFactory, Orchestrator, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Runtime::new("dev", ".")?;
//! let server = HttpServerFactory::new(
//!     ServerConfig::builder("http-server").bind_address("0.0.0.0:8000").build(),
//! )
//! .build()?;
//!
//! Orchestrator::new(runtime).server(Arc::new(server)).run().await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/pylon-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod factory;
mod handle;
mod lifecycle;
mod orchestrator;
mod router;
pub mod shutdown;
mod tls;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_IDLE_TIMEOUT, DEFAULT_READ_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use error::{ServerError, ServerResult};
pub use factory::{HttpServerFactory, ServerOptions, OPTION_HANDLERS, OPTION_TLS};
pub use handle::{HttpServer, ListenAddr, Server};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleResult};
pub use orchestrator::{run_with_restart, Orchestrator};
pub use router::{RouteMatch, Router};
pub use shutdown::{listen_os_signals, ShutdownReceiver, ShutdownSignal, StopSignal};
pub use tls::load_tls_acceptor;
