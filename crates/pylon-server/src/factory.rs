//! Builds [`HttpServer`]s from configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use pylon_middleware::{MiddlewareChain, Route};
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handle::HttpServer;
use crate::router::Router;

/// Option flag that registers the application routes on a server.
pub const OPTION_HANDLERS: &str = "handlers";

/// Option flag that serves over TLS.
pub const OPTION_TLS: &str = "tls";

/// A `;`-separated set of server option flags.
///
/// ```rust
/// use pylon_server::ServerOptions;
///
/// let options = ServerOptions::parse(" handlers ; tls;");
/// assert!(options.contains("handlers"));
/// assert!(options.contains("tls"));
/// assert_eq!(options.to_string(), "handlers;tls");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions(BTreeSet<String>);

impl ServerOptions {
    /// Parses an option string. Entries are trimmed and blanks dropped.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Whether `option` is set.
    pub fn contains(&self, option: &str) -> bool {
        self.0.contains(option)
    }
}

impl fmt::Display for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&joined.join(";"))
    }
}

/// Assembles one named HTTP server.
///
/// ```rust
/// use pylon_middleware::{full, MiddlewareChain, MiddlewareContext, Request, Response, Route};
/// use pylon_server::{HttpServerFactory, Server, ServerConfig, ServerOptions};
/// use std::sync::Arc;
///
/// let config = ServerConfig::builder("api").bind_address("127.0.0.1:0").build();
/// let server = HttpServerFactory::new(config)
///     .options(ServerOptions::parse("handlers"))
///     .routes(vec![Route::new(
///         "/ping",
///         |_ctx: &mut MiddlewareContext, _req: Request| async { Response::new(full("pong")) },
///     )])
///     .chain(Arc::new(MiddlewareChain::builder().build()))
///     .build()
///     .unwrap();
///
/// assert_eq!(server.name(), "api");
/// assert_eq!(server.patterns(), ["/ping"]);
/// ```
#[must_use]
pub struct HttpServerFactory {
    config: ServerConfig,
    options: ServerOptions,
    routes: Vec<Route>,
    chain: Arc<MiddlewareChain>,
    tls: Option<TlsAcceptor>,
}

impl HttpServerFactory {
    /// Starts a factory for the given server configuration.
    ///
    /// Default: options `handlers`, no routes, an empty middleware chain.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            options: ServerOptions::parse(OPTION_HANDLERS),
            routes: Vec::new(),
            chain: Arc::new(MiddlewareChain::builder().build()),
            tls: None,
        }
    }

    /// Sets the option flags.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Application routes, registered when the `handlers` option is set.
    pub fn routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    /// Middleware chain wrapped around every route.
    pub fn chain(mut self, chain: Arc<MiddlewareChain>) -> Self {
        self.chain = chain;
        self
    }

    /// TLS acceptor, used when the `tls` option is set.
    pub fn tls(mut self, acceptor: Option<TlsAcceptor>) -> Self {
        self.tls = acceptor;
        self
    }

    /// Builds the server.
    pub fn build(self) -> ServerResult<HttpServer> {
        let name = self.config.name().to_string();
        if self.config.bind_address().trim().is_empty() {
            return Err(ServerError::Config(format!(
                "property '{name}.bind-address' not found"
            )));
        }

        let mut router = Router::new();
        if self.options.contains(OPTION_HANDLERS) {
            for route in &self.routes {
                let bound = self.chain.bind(route.pattern(), route.handler());
                if !router.insert(route.pattern(), bound) {
                    tracing::warn!(server = %name, pattern = route.pattern(), "pattern already registered");
                }
            }
        }

        let tls = if self.options.contains(OPTION_TLS) {
            if self.tls.is_none() {
                tracing::warn!(server = %name, "TLS config not found");
            }
            self.tls
        } else {
            None
        };

        tracing::info!(
            server = %name,
            addr = %self.config.bind_address(),
            handlers = router.len(),
            options = %self.options,
            tls = tls.is_some(),
            "server configured"
        );

        Ok(HttpServer::new(self.config, router, tls))
    }
}

impl fmt::Debug for HttpServerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerFactory")
            .field("config", &self.config)
            .field("options", &self.options)
            .field("routes", &self.routes.len())
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}
