//! Server handles.
//!
//! A [`Server`] is one independently bindable and serveable listener. The
//! orchestrator only ever sees this trait, so any listener type can join a
//! server group by implementing it.
//!
//! [`HttpServer`] is the hyper-backed implementation: HTTP/1.1 over TCP,
//! optionally wrapped in TLS, dispatching each request through the
//! middleware chain bound to its route pattern.
//!
//! # Lifecycle
//!
//! ```text
//! new ──bind()──▶ bound ──serve()──▶ alive ──shutdown()──▶ draining ──▶ done
//!  │                │                                                  ▲
//!  └───────────────┴──────────────── shutdown() ──────────────────────┘
//! ```
//!
//! `shutdown` may be called at any point, from any task, any number of
//! times; only the first call does anything.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use pylon_core::RequestId;
use pylon_middleware::{BoundChain, BoxFuture, MiddlewareContext, Response, ResponseExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownReceiver, ShutdownSignal};

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Address a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenAddr {
    /// Not bound yet.
    Empty,
    /// Bound TCP socket.
    Tcp(SocketAddr),
}

impl ListenAddr {
    /// The socket address, if bound.
    pub fn socket_addr(self) -> Option<SocketAddr> {
        match self {
            Self::Empty => None,
            Self::Tcp(addr) => Some(addr),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// One listener in a server group.
pub trait Server: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Opens the listener.
    fn bind(&self) -> ServerResult<()>;

    /// `true` while `serve` is accepting connections.
    fn alive(&self) -> bool;

    /// Bound address, [`ListenAddr::Empty`] until `bind` succeeds.
    fn listen_address(&self) -> ListenAddr;

    /// Accepts connections until shut down or the listener fails.
    ///
    /// Returns `Ok` when stopped by `shutdown`.
    fn serve(&self) -> BoxFuture<'_, ServerResult<()>>;

    /// Stops the server. Idempotent and safe to call before `bind`.
    fn shutdown(&self) -> ServerResult<()>;

    /// Resolves once `shutdown` has been called.
    fn shutdown_notified(&self) -> ShutdownReceiver;
}

/// State shared between the accept loop and connection tasks.
struct Shared {
    config: ServerConfig,
    routes: Router<BoundChain>,
    tls: Option<TlsAcceptor>,
    shutdown: ShutdownSignal,
}

/// HTTP/1.1 server.
pub struct HttpServer {
    shared: Arc<Shared>,
    listener: Mutex<Option<std::net::TcpListener>>,
    local_addr: Mutex<ListenAddr>,
    alive: AtomicBool,
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.shared.config.name())
            .field("bind_address", &self.shared.config.bind_address())
            .field("routes", &self.shared.routes.len())
            .field("tls", &self.shared.tls.is_some())
            .field("alive", &self.alive())
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    /// Creates a server over pre-bound routes.
    ///
    /// Usually built through [`HttpServerFactory`](crate::HttpServerFactory).
    pub fn new(config: ServerConfig, routes: Router<BoundChain>, tls: Option<TlsAcceptor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                routes,
                tls,
                shutdown: ShutdownSignal::new(),
            }),
            listener: Mutex::new(None),
            local_addr: Mutex::new(ListenAddr::Empty),
            alive: AtomicBool::new(false),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Registered route patterns.
    pub fn patterns(&self) -> Vec<&str> {
        self.shared.routes.patterns().collect()
    }

    /// Whether connections are wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        self.shared.tls.is_some()
    }

    async fn accept_loop(&self, listener: TcpListener) -> ServerResult<()> {
        let tracker = ConnectionTracker::new();
        let mut shutdown = self.shared.shutdown.recv();
        let mut backoff = Duration::ZERO;

        let result = loop {
            tokio::select! {
                biased;

                () = &mut shutdown => break Ok(()),

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        backoff = Duration::ZERO;
                        let token = tracker.acquire();
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            shared.handle_stream(stream, remote_addr).await;
                            drop(token);
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        backoff = (backoff * 2).clamp(MIN_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF);
                        tracing::warn!(
                            server = %self.name(),
                            error = %e,
                            retry_in = ?backoff,
                            "accept failed"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        tracing::warn!(server = %self.name(), error = %e, "listener failed");
                        break Err(ServerError::io(self.name(), e));
                    }
                },
            }
        };
        drop(listener);

        // Open connections only finish gracefully once the signal fires.
        self.shared.shutdown.trigger();

        let timeout = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(timeout, tracker.drained()).await.is_err() {
            tracing::warn!(
                server = %self.name(),
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            );
        }

        result
    }
}

impl Server for HttpServer {
    fn name(&self) -> &str {
        self.shared.config.name()
    }

    fn bind(&self) -> ServerResult<()> {
        let mut slot = self.listener.lock();
        let mut local_addr = self.local_addr.lock();
        if *local_addr != ListenAddr::Empty {
            return Err(ServerError::AlreadyBound(self.name().to_string()));
        }

        let addr = self.shared.config.bind_address();
        let listener = std::net::TcpListener::bind(addr).map_err(|e| ServerError::bind(addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::bind(addr, e))?;
        let bound = listener.local_addr().map_err(|e| ServerError::bind(addr, e))?;

        *local_addr = ListenAddr::Tcp(bound);
        *slot = Some(listener);

        tracing::debug!(server = %self.name(), addr = %bound, tls = self.is_tls(), "server bound");
        Ok(())
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn listen_address(&self) -> ListenAddr {
        *self.local_addr.lock()
    }

    fn serve(&self) -> BoxFuture<'_, ServerResult<()>> {
        Box::pin(async move {
            let Some(listener) = self.listener.lock().take() else {
                if self.shared.shutdown.is_shutdown() {
                    return Ok(());
                }
                return Err(ServerError::NotBound(self.name().to_string()));
            };
            let listener =
                TcpListener::from_std(listener).map_err(|e| ServerError::io(self.name(), e))?;

            tracing::info!(server = %self.name(), addr = %self.listen_address(), "serving");
            self.alive.store(true, Ordering::Release);
            let result = self.accept_loop(listener).await;
            self.alive.store(false, Ordering::Release);
            result
        })
    }

    fn shutdown(&self) -> ServerResult<()> {
        if self.shared.shutdown.trigger() {
            tracing::info!(server = %self.name(), addr = %self.listen_address(), "server shutdown");
            // A listener that was never served is closed here.
            drop(self.listener.lock().take());
        }
        Ok(())
    }

    fn shutdown_notified(&self) -> ShutdownReceiver {
        self.shared.shutdown.recv()
    }
}

impl Shared {
    async fn handle_stream(self: Arc<Self>, stream: tokio::net::TcpStream, remote_addr: SocketAddr) {
        let Some(acceptor) = self.tls.clone() else {
            self.serve_connection(stream, remote_addr).await;
            return;
        };

        let handshake = acceptor.accept(stream);
        let read_timeout = self.config.read_timeout();
        let accepted = if read_timeout.is_zero() {
            handshake.await
        } else {
            match tokio::time::timeout(read_timeout, handshake).await {
                Ok(accepted) => accepted,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out")),
            }
        };

        match accepted {
            Ok(tls_stream) => self.serve_connection(tls_stream, remote_addr).await,
            Err(e) => {
                tracing::debug!(server = %self.config.name(), remote_addr = %remote_addr, error = %e, "TLS handshake failed");
            }
        }
    }

    async fn serve_connection<I>(self: Arc<Self>, io: I, remote_addr: SocketAddr)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut shutdown = self.shutdown.recv();
        let name = self.config.name().to_string();

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .keep_alive(self.config.keep_alive());
        if !self.config.read_timeout().is_zero() {
            builder.header_read_timeout(self.config.read_timeout());
        }

        let shared = self;
        let service = service_fn(move |request: http::Request<Incoming>| {
            let shared = Arc::clone(&shared);
            async move { Ok::<_, Infallible>(shared.handle(request, remote_addr).await) }
        });

        let conn = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = &mut shutdown => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(e) = result {
            tracing::debug!(server = %name, remote_addr = %remote_addr, error = %e, "connection error");
        }
    }

    async fn handle(&self, request: http::Request<Incoming>, remote_addr: SocketAddr) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let request_id = parts
            .headers
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();

        let Some(matched) = self.routes.find(parts.uri.path()) else {
            pylon_telemetry::metrics::record_request(
                self.config.name(),
                "",
                StatusCode::NOT_FOUND.as_u16(),
                started.elapsed(),
            );
            return Response::error(StatusCode::NOT_FOUND, "404 page not found");
        };
        let pattern = matched.pattern();
        let chain = matched.value();
        let params = matched.into_params();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(server = %self.config.name(), pattern, error = %e, "failed to read request body");
                return Response::error(StatusCode::BAD_REQUEST, "failed to read request body");
            }
        };
        let request = http::Request::from_parts(parts, Full::new(body));

        let mut ctx = MiddlewareContext::with_request_id(request_id);
        ctx.set_remote_addr(remote_addr);
        ctx.set_pattern(pattern);
        ctx.set_params(params);

        let mut response = self.dispatch(chain, &mut ctx, request).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }

        pylon_telemetry::metrics::record_request(
            self.config.name(),
            pattern,
            response.status().as_u16(),
            started.elapsed(),
        );
        response
    }

    async fn dispatch(
        &self,
        chain: &BoundChain,
        ctx: &mut MiddlewareContext,
        request: pylon_middleware::Request,
    ) -> Response {
        let request_id = ctx.request_id();
        let call = AssertUnwindSafe(chain.call(ctx, request)).catch_unwind();
        let write_timeout = self.config.write_timeout();

        let outcome = if write_timeout.is_zero() {
            call.await
        } else {
            match tokio::time::timeout(write_timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        server = %self.config.name(),
                        pattern = chain.pattern(),
                        %request_id,
                        timeout = ?write_timeout,
                        "handler timed out"
                    );
                    return Response::error(StatusCode::GATEWAY_TIMEOUT, "handler timed out");
                }
            }
        };

        outcome.unwrap_or_else(|payload| {
            let err = ServerError::from_panic(payload.as_ref());
            tracing::error!(
                server = %self.config.name(),
                pattern = chain.pattern(),
                %request_id,
                error = %err,
                "handler panicked"
            );
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        })
    }
}

/// Request id header, honoured on requests and echoed on responses.
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(23 | 24)) // ENFILE, EMFILE
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_middleware::{full, MiddlewareChain, Request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn server_with(bind: &str, write_timeout: Duration) -> HttpServer {
        let chain = MiddlewareChain::builder().build();
        let mut routes = Router::new();
        routes.insert(
            "/hello/{name}",
            chain.bind(
                "/hello/{name}",
                Arc::new(|ctx: &mut MiddlewareContext, _req: Request| {
                    let name = ctx.param("name").unwrap_or_default().to_string();
                    async move { Response::new(full(format!("hello {name}"))) }
                }),
            ),
        );
        routes.insert(
            "/slow",
            chain.bind(
                "/slow",
                Arc::new(|_ctx: &mut MiddlewareContext, _req: Request| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Response::new(full("late"))
                }),
            ),
        );
        routes.insert(
            "/panic",
            chain.bind(
                "/panic",
                Arc::new(|_ctx: &mut MiddlewareContext, req: Request| async move {
                    assert!(req.uri().path().is_empty(), "handler bug");
                    Response::new(full(""))
                }),
            ),
        );
        routes.insert(
            "/id",
            chain.bind(
                "/id",
                Arc::new(|ctx: &mut MiddlewareContext, _req: Request| {
                    let id = ctx.request_id().to_string();
                    async move { Response::new(full(id)) }
                }),
            ),
        );
        let config = ServerConfig::builder("test")
            .bind_address(bind)
            .write_timeout(write_timeout)
            .shutdown_timeout(Duration::from_millis(200))
            .build();
        HttpServer::new(config, routes, None)
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        get_with(addr, path, "").await
    }

    async fn get_with(addr: SocketAddr, path: &str, extra: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{extra}\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_listen_addr_display() {
        assert_eq!(ListenAddr::Empty.to_string(), "");
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        assert_eq!(ListenAddr::Tcp(addr).to_string(), "127.0.0.1:8000");
        assert_eq!(ListenAddr::Tcp(addr).socket_addr(), Some(addr));
    }

    #[test]
    fn test_listen_address_empty_until_bound() {
        let server = server_with("127.0.0.1:0", Duration::ZERO);
        assert_eq!(server.listen_address(), ListenAddr::Empty);

        server.bind().unwrap();
        assert!(matches!(server.listen_address(), ListenAddr::Tcp(addr) if addr.port() != 0));
    }

    #[test]
    fn test_bind_twice_fails() {
        let server = server_with("127.0.0.1:0", Duration::ZERO);
        server.bind().unwrap();
        assert!(matches!(server.bind(), Err(ServerError::AlreadyBound(_))));
    }

    #[test]
    fn test_bind_port_in_use() {
        let first = server_with("127.0.0.1:0", Duration::ZERO);
        first.bind().unwrap();
        let taken = first.listen_address().to_string();

        let second = server_with(&taken, Duration::ZERO);
        let err = second.bind().unwrap_err();
        assert!(err.to_string().starts_with(&format!("can not bind to port '{taken}'")));
        assert_eq!(second.listen_address(), ListenAddr::Empty);
    }

    #[tokio::test]
    async fn test_serve_without_bind() {
        let server = server_with("127.0.0.1:0", Duration::ZERO);
        assert!(matches!(server.serve().await, Err(ServerError::NotBound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_bind_is_ok() {
        let server = server_with("127.0.0.1:0", Duration::ZERO);
        server.shutdown().unwrap();
        server.shutdown().unwrap();
        server.shutdown_notified().await;
    }

    #[tokio::test]
    async fn test_serve_after_shutdown_returns_ok() {
        let server = server_with("127.0.0.1:0", Duration::ZERO);
        server.bind().unwrap();
        server.shutdown().unwrap();
        assert!(server.serve().await.is_ok());
        assert!(!server.alive());
    }

    #[tokio::test]
    async fn test_serve_routes_and_shutdown() {
        let server = Arc::new(server_with("127.0.0.1:0", Duration::ZERO));
        server.bind().unwrap();
        let addr = server.listen_address().socket_addr().unwrap();

        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move { serving.serve().await });

        let response = get(addr, "/hello/pylon").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("hello pylon"));
        assert!(server.alive());

        let response = get(addr, "/missing").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert!(response.ends_with("404 page not found\n"));

        server.shutdown().unwrap();
        task.await.unwrap().unwrap();
        assert!(!server.alive());
    }

    #[tokio::test]
    async fn test_request_id_propagated() {
        let server = Arc::new(server_with("127.0.0.1:0", Duration::ZERO));
        server.bind().unwrap();
        let addr = server.listen_address().socket_addr().unwrap();
        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move { serving.serve().await });

        let id = "01890a5d-ac96-774b-bcce-b302099a8057";
        let response = get_with(addr, "/id", &format!("X-Request-Id: {id}\r\n")).await;
        assert!(response.to_lowercase().contains(&format!("x-request-id: {id}")));
        assert!(response.ends_with(id));

        // A malformed id is replaced with a fresh one.
        let response = get_with(addr, "/id", "X-Request-Id: nope\r\n").await;
        let body = response.rsplit("\r\n\r\n").next().unwrap();
        assert_eq!(body.len(), 36);
        assert!(RequestId::parse(body).is_some());

        server.shutdown().unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_timeout_returns_504() {
        let server = Arc::new(server_with("127.0.0.1:0", Duration::from_millis(50)));
        server.bind().unwrap();
        let addr = server.listen_address().socket_addr().unwrap();
        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move { serving.serve().await });

        let response = get(addr, "/slow").await;
        assert!(response.starts_with("HTTP/1.1 504 Gateway Timeout"));

        server.shutdown().unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_panic_returns_500() {
        let server = Arc::new(server_with("127.0.0.1:0", Duration::ZERO));
        server.bind().unwrap();
        let addr = server.listen_address().socket_addr().unwrap();
        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move { serving.serve().await });

        let response = get(addr, "/panic").await;
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error"));

        server.shutdown().unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
