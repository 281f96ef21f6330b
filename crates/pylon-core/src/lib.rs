//! # Pylon Core
//!
//! Core types shared by every Pylon crate.
//!
//! - [`Runtime`] - process-wide state: profile, home directory, shutdown and restart flags
//! - [`RequestId`] - UUID v7 request identifier
//! - [`AuthInfo`] - identity attached to a request by the auth gate
//! - [`LogRotate`] - capability implemented by rotatable log sinks
//! - [`CoreError`] - error type for runtime construction

#![doc(html_root_url = "https://docs.rs/pylon-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod identity;
mod rotate;
mod runtime;

pub use context::RequestId;
pub use error::{CoreError, CoreResult};
pub use identity::AuthInfo;
pub use rotate::LogRotate;
pub use runtime::{Runtime, APP_NAME, APP_VERSION};
