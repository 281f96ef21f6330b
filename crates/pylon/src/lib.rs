//! # Pylon
//!
//! Multi-server HTTP runtime. Several named HTTP servers share one ordered
//! middleware chain and run as a single unit: when any server stops, all of
//! them stop. OS signals shut the group down, SIGHUP rotates log files or
//! restarts the whole group when there is nothing to rotate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pylon::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AppError> {
//!     let runtime = Runtime::new("dev", ".")?;
//!     let config = load_config(runtime.home_dir(), runtime.profile(), None)?;
//!
//!     Application::new(runtime, config).build()?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request path
//!
//! ```text
//! accept → route match → compression → rate-limit → auth → handler
//! ```
//!
//! Stage order comes from configuration; a stage only wraps routes whose
//! pattern it matches.

#![doc(html_root_url = "https://docs.rs/pylon/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod error;

pub use app::{build_chain, load_config, resolve_path, Application};
pub use error::{AppError, AppResult};

// Re-export the component crates
pub use pylon_config as config;
pub use pylon_core as core;
pub use pylon_middleware as middleware;
pub use pylon_server as server;
pub use pylon_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```rust
/// use pylon::prelude::*;
/// ```
pub mod prelude {
    pub use crate::app::{load_config, Application};
    pub use crate::error::{AppError, AppResult};

    pub use pylon_config::{ConfigLoader, PylonConfig};
    pub use pylon_core::{LogRotate, Runtime};

    pub use pylon_middleware::{
        full, Middleware, MiddlewareChain, MiddlewareContext, Next, Request, Response,
        ResponseExt, Route,
    };

    pub use pylon_server::{
        run_with_restart, HttpServer, Orchestrator, Server, ServerConfig, ServerError, StopSignal,
    };
}
