//! Application assembly.
//!
//! Turns a [`PylonConfig`] into a ready-to-run [`Orchestrator`]: one
//! middleware chain shared by every server, one [`pylon_server::HttpServer`] per
//! configured server, built-in routes, and the teardown hooks the chain
//! needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use pylon_config::{ConfigLoader, PylonConfig, ENV_PREFIX};
use pylon_core::{LogRotate, Runtime};
use pylon_middleware::stages::{
    AuthMiddleware, CompressionMiddleware, RateLimitMiddleware, StaticTokenProvider,
};
use pylon_middleware::{MiddlewareChain, MiddlewareContext, Request, Response, ResponseExt, Route};
use pylon_server::{
    load_tls_acceptor, HttpServerFactory, Lifecycle, Orchestrator, Server, ServerConfig,
    ServerOptions, StopSignal, OPTION_TLS,
};
use tokio::sync::mpsc;

use crate::error::AppResult;

/// Loads the configuration for `profile` from `home`.
///
/// Layers, later winning: the profile preset, `pylon.toml`,
/// `pylon.<profile>.toml`, `.env`, then `PYLON__*` variables. A `bind`
/// override replaces every server's bind address.
pub fn load_config(home: &Path, profile: &str, bind: Option<&str>) -> AppResult<PylonConfig> {
    let mut config = ConfigLoader::new()
        .with_profile_preset(profile)
        .with_optional_file(home.join("pylon.toml"))?
        .with_optional_file(home.join(format!("pylon.{profile}.toml")))?
        .with_dotenv_file(home.join(".env"))?
        .with_env_prefix(ENV_PREFIX)
        .load()?;

    if let Some(bind) = bind {
        config.override_bind_address(bind);
        config.validate()?;
    }
    Ok(config)
}

/// Resolves `path` against `home` unless it is absolute.
pub fn resolve_path(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

/// The assembled application.
#[must_use]
pub struct Application {
    runtime: Runtime,
    config: PylonConfig,
    routes: Vec<Route>,
    rotators: Vec<Arc<dyn LogRotate>>,
    signals: Option<mpsc::Receiver<StopSignal>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("profile", &self.runtime.profile())
            .field("servers", &self.config.servers.keys().collect::<Vec<_>>())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Creates the application with the built-in `/health` and `/api/status` routes.
    pub fn new(runtime: Runtime, config: PylonConfig) -> Self {
        let routes = builtin_routes(&runtime);
        Self {
            runtime,
            config,
            routes,
            rotators: Vec::new(),
            signals: None,
        }
    }

    /// Adds an application route, served by every server with the `handlers` option.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Log sinks rotated on SIGHUP.
    pub fn rotators(mut self, rotators: impl IntoIterator<Item = Arc<dyn LogRotate>>) -> Self {
        self.rotators.extend(rotators);
        self
    }

    /// Replaces OS signals with an injected channel.
    pub fn signals(mut self, signals: mpsc::Receiver<StopSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// The loaded configuration.
    pub fn config(&self) -> &PylonConfig {
        &self.config
    }

    /// Registered route patterns.
    pub fn patterns(&self) -> Vec<&str> {
        self.routes.iter().map(Route::pattern).collect()
    }

    /// Builds every server and returns the orchestrator that runs them.
    ///
    /// Must be called within a Tokio runtime: the rate limiter starts its
    /// sweep task here.
    pub fn build(self) -> AppResult<Orchestrator> {
        let (chain, lifecycle) = build_chain(&self.config)?;
        let chain = Arc::new(chain);
        tracing::debug!(middleware = ?chain.names(), "middleware chain built");

        let tls = match &self.config.tls {
            Some(tls) if self.uses_tls() => {
                let home = self.runtime.home_dir();
                Some(load_tls_acceptor(
                    &resolve_path(home, &tls.cert_path),
                    &resolve_path(home, &tls.key_path),
                )?)
            }
            _ => None,
        };

        let mut servers: Vec<Arc<dyn Server>> = Vec::with_capacity(self.config.servers.len());
        for (name, settings) in &self.config.servers {
            let config = ServerConfig::builder(name.as_str())
                .bind_address(settings.bind_address.as_str())
                .read_timeout(settings.read_timeout())
                .write_timeout(settings.write_timeout())
                .idle_timeout(settings.idle_timeout())
                .shutdown_timeout(settings.shutdown_timeout())
                .build();
            let options = ServerOptions::parse(&settings.options);
            let tls = if options.contains(OPTION_TLS) {
                tls.clone()
            } else {
                None
            };

            let server = HttpServerFactory::new(config)
                .options(options)
                .routes(self.routes.clone())
                .chain(Arc::clone(&chain))
                .tls(tls)
                .build()?;
            servers.push(Arc::new(server));
        }

        let mut orchestrator = Orchestrator::new(self.runtime)
            .servers(servers)
            .rotators(self.rotators)
            .lifecycle(lifecycle);
        if let Some(signals) = self.signals {
            orchestrator = orchestrator.signals(signals);
        }
        Ok(orchestrator)
    }

    fn uses_tls(&self) -> bool {
        self.config
            .servers
            .values()
            .any(|s| ServerOptions::parse(&s.options).contains(OPTION_TLS))
    }
}

/// Builds the middleware chain described by `config`.
///
/// The returned lifecycle stops the rate limiter's sweep task on shutdown.
pub fn build_chain(config: &PylonConfig) -> AppResult<(MiddlewareChain, Lifecycle)> {
    let mut builder = MiddlewareChain::builder();
    let mut lifecycle = Lifecycle::new();

    let compression = &config.compression;
    if compression.enabled {
        builder = builder.register(
            compression.order,
            CompressionMiddleware::builder()
                .level(compression.level)
                .threshold(compression.threshold)
                .skip(compression.skip.clone())
                .max_request_size(compression.max_request_bytes)
                .build(),
        );
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled {
        let limiter = Arc::new(
            RateLimitMiddleware::builder()
                .prefixes(rate_limit.prefixes.clone())
                .limit(u64::from(rate_limit.limit))
                .interval(rate_limit.interval())
                .header(rate_limit.header.as_str())
                .spawn(),
        );
        builder = builder.register_shared(rate_limit.order, limiter.clone());
        lifecycle = lifecycle.on_shutdown("rate-limit", move || {
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.shutdown().await;
                Ok(())
            }
        });
    }

    let auth = &config.auth;
    if auth.enabled {
        let provider = StaticTokenProvider::new(&auth.tokens)?;
        if provider.is_empty() {
            tracing::debug!("no auth tokens configured, auth gate disabled");
        } else {
            builder = builder.register(
                auth.order,
                AuthMiddleware::new(auth.prefixes.clone(), Arc::new(provider)),
            );
        }
    }

    Ok((builder.build(), lifecycle))
}

fn builtin_routes(runtime: &Runtime) -> Vec<Route> {
    let health = Route::new("/health", |_ctx: &mut MiddlewareContext, _req: Request| async {
        Response::json(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
    });

    let runtime = runtime.clone();
    let status = Route::new(
        "/api/status",
        move |_ctx: &mut MiddlewareContext, _req: Request| {
            let stats: serde_json::Map<String, serde_json::Value> = runtime
                .stats()
                .into_iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
                .collect();
            async move { Response::json(StatusCode::OK, &serde_json::Value::Object(stats)) }
        },
    );

    vec![health, status]
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use pylon_middleware::Handler;

    fn runtime() -> Runtime {
        Runtime::from_parts(
            "test",
            PathBuf::from("/srv/pylon"),
            "pylon",
            PathBuf::from("/usr/bin"),
        )
    }

    #[test]
    fn test_resolve_path() {
        let home = Path::new("/srv/pylon");
        assert_eq!(
            resolve_path(home, Path::new("logs/a.log")),
            PathBuf::from("/srv/pylon/logs/a.log")
        );
        assert_eq!(
            resolve_path(home, Path::new("/var/log/a.log")),
            PathBuf::from("/var/log/a.log")
        );
    }

    #[tokio::test]
    async fn test_chain_without_tokens_skips_auth() {
        let (chain, lifecycle) = build_chain(&PylonConfig::default()).unwrap();
        assert_eq!(chain.names(), ["compression", "rate-limit"]);
        assert_eq!(lifecycle.shutdown_hook_count(), 1);
        lifecycle.run_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_chain_with_tokens() {
        let mut config = PylonConfig::default();
        config.auth.tokens = vec!["s3cret".to_string()];
        config.compression.enabled = false;

        let (chain, lifecycle) = build_chain(&config).unwrap();
        assert_eq!(chain.names(), ["rate-limit", "auth"]);
        lifecycle.run_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_chain_rejects_token_with_comma() {
        let mut config = PylonConfig::default();
        config.auth.tokens = vec!["a,b".to_string()];
        config.rate_limit.enabled = false;

        let err = build_chain(&config).unwrap_err();
        assert!(matches!(err, crate::AppError::Token(_)));
    }

    #[tokio::test]
    async fn test_builtin_routes() {
        let app = Application::new(runtime(), PylonConfig::default());
        assert_eq!(app.patterns(), ["/health", "/api/status"]);

        let status = &app.routes[1];
        let mut ctx = MiddlewareContext::new();
        let request = Request::new(http_body_util::Full::default());
        let response = status.handler().call(&mut ctx, request).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["profile"], "test");
        assert_eq!(json["home"], "/srv/pylon");
        assert_eq!(json["name"], "pylon");
    }

    #[tokio::test]
    async fn test_missing_bind_address_fails_build() {
        let mut config = PylonConfig::default();
        config.override_bind_address("");
        config.rate_limit.enabled = false;

        let err = Application::new(runtime(), config).build().unwrap_err();
        assert_eq!(err.to_string(), "property 'http-server.bind-address' not found");
    }

    #[test]
    fn test_load_config_from_home() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("pylon.toml"), "[rate_limit]\nlimit = 50\n").unwrap();
        std::fs::write(
            home.path().join("pylon.staging.toml"),
            "[servers.edge]\nbind_address = \"127.0.0.1:9100\"\n",
        )
        .unwrap();

        let config = load_config(home.path(), "staging", Some("127.0.0.1:9200")).unwrap();
        assert_eq!(config.rate_limit.limit, 50);
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers["edge"].bind_address, "127.0.0.1:9200");
    }
}
