//! Typed configuration system for Pylon.
//!
//! Configuration is assembled in layers, later layers overriding earlier ones:
//!
//! 1. Built-in defaults (or a development/production preset)
//! 2. `pylon.toml` in the home directory
//! 3. `pylon.<profile>.toml` in the home directory
//! 4. Environment variables `PYLON__SECTION__KEY` (a `.env` file is honoured)
//!
//! Files are merged table by table, so a profile file only needs to name the
//! keys it changes. Unknown keys are rejected.
//!
//! # Configuration File Format
//!
//! ```toml
//! [servers.http-server]
//! bind_address = "0.0.0.0:8000"
//! options = "handlers"
//!
//! [servers.admin]
//! bind_address = "127.0.0.1:8443"
//! options = "handlers;tls"
//! write_timeout_ms = 10000
//!
//! [compression]
//! level = 1
//! threshold = 1024
//! skip = ["/images", "/videos", "/ws"]
//!
//! [rate_limit]
//! prefixes = ["/api"]
//! limit = 10
//! interval_ms = 1000
//! header = "X-Forwarded-For"
//!
//! [auth]
//! prefixes = ["/api"]
//! tokens = ["s3cret"]
//!
//! [tls]
//! cert_path = "certs/server.pem"
//! key_path = "certs/server.key"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! file = "logs/pylon.log"
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `PYLON__SERVERS__HTTP_SERVER__BIND_ADDRESS=0.0.0.0:9000`
//! - `PYLON__RATE_LIMIT__LIMIT=100`
//! - `PYLON__AUTH__TOKENS=alpha,beta`
//! - `PYLON__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/pylon-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::PylonConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{
    AuthSettings, CompressionSettings, LogFormat, LoggingSettings, MetricsSettings,
    RateLimitSettings, ServerSettings, TlsSettings, DEFAULT_SERVER_NAME,
};
