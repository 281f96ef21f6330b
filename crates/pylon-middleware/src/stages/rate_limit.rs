//! Rate limiting middleware.
//!
//! Counts requests per client in fixed windows. The client is identified
//! by a configurable header (default `X-Forwarded-For`), because the
//! limiter is meant to sit behind a proxy that sets it; the peer address
//! is never used. Requests without the header pass through and are
//! logged. A header whose first token is blank still counts, under the
//! empty client id.
//!
//! ## Algorithm
//!
//! - each client has a bucket `{count, window_start}`
//! - once more than `interval` has passed since `window_start`, the bucket
//!   resets
//! - at `limit` requests the client gets `429 Too Many Requests` with
//!   `Retry-After` set to the window length in seconds
//! - a background sweep every `10 × interval` drops buckets whose window
//!   started more than `5 × interval` ago
//!
//! The sweep task must be stopped with [`RateLimitMiddleware::shutdown`];
//! dropping the middleware aborts it as a fallback.
//!
//! ## Example
//!
//! ```ignore
//! use pylon_middleware::stages::RateLimitMiddleware;
//! use std::time::Duration;
//!
//! let limiter = RateLimitMiddleware::builder()
//!     .prefixes(["/api"])
//!     .limit(100)
//!     .interval(Duration::from_secs(60))
//!     .spawn();
//!
//! // ...
//! limiter.shutdown().await;
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::{header, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sweep period, as a multiple of the window interval.
const SWEEP_FACTOR: u32 = 10;

/// Buckets idle for longer than this many intervals are evicted.
const STALE_FACTOR: u32 = 5;

/// Shortest window accepted by the builder.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for rate limiting middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    prefixes: Vec<String>,
    limit: u64,
    interval: Duration,
    header: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["/api".to_string()],
            limit: 10,
            interval: Duration::from_secs(1),
            header: "X-Forwarded-For".to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Route prefixes the limiter applies to.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Header carrying the client identifier.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// `Retry-After` value: the window length in whole seconds, at least 1.
    fn retry_after(&self) -> u64 {
        let secs = self.interval.as_secs();
        if self.interval.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_start: Instant,
}

type Buckets = Arc<Mutex<HashMap<String, Bucket>>>;

struct Sweeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Outcome of checking one request against its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Allowed,
    Limited,
}

/// Fixed-window rate limiting middleware.
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    buckets: Buckets,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimitMiddleware {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Creates the limiter and starts its sweep task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: RateLimitConfig) -> Self {
        let buckets: Buckets = Arc::new(Mutex::new(HashMap::new()));
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(sweep_loop(Arc::clone(&buckets), config.interval, stopped));

        tracing::debug!(
            limit = config.limit,
            interval_ms = config.interval.as_millis() as u64,
            header = %config.header,
            "rate limiter started"
        );

        Self {
            config,
            buckets,
            sweeper: Mutex::new(Some(Sweeper { stop, task })),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of tracked client buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Stops the sweep task and waits for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(Sweeper { stop, task }) = sweeper {
            let _ = stop.send(());
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("rate limiter sweep task panicked");
                }
            }
            tracing::debug!("rate limiter stopped");
        }
    }

    fn check(&self, client_id: &str) -> Decision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(client_id.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) > self.config.interval {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.limit {
            Decision::Limited
        } else {
            bucket.count += 1;
            Decision::Allowed
        }
    }

    fn too_many_requests(&self) -> Response {
        let mut response = Response::error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(self.config.retry_after()));
        response
    }
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("config", &self.config)
            .field("buckets", &self.bucket_count())
            .finish_non_exhaustive()
    }
}

impl Drop for RateLimitMiddleware {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.task.abort();
        }
    }
}

async fn sweep_loop(buckets: Buckets, interval: Duration, mut stopped: oneshot::Receiver<()>) {
    let period = interval * SWEEP_FACTOR;
    let stale = interval * STALE_FACTOR;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = &mut stopped => return,
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut buckets = buckets.lock();
                let before = buckets.len();
                buckets.retain(|_, b| now.duration_since(b.window_start) <= stale);
                let evicted = before - buckets.len();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = buckets.len(), "rate limiter evicted stale buckets");
                }
            }
        }
    }
}

/// Client identifier: the first comma-separated token, trimmed.
fn client_id(value: &str) -> &str {
    value.split(',').next().unwrap_or_default().trim()
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn matches(&self, pattern: &str) -> bool {
        self.config
            .prefixes
            .iter()
            .any(|prefix| pattern.starts_with(prefix.as_str()))
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if request.method() == Method::OPTIONS {
                return next.run(ctx, request).await;
            }

            let id = request
                .headers()
                .get(self.config.header.as_str())
                .map(|v| client_id(&String::from_utf8_lossy(v.as_bytes())).to_string());

            let Some(id) = id else {
                tracing::warn!(
                    header = %self.config.header,
                    remote_addr = ?ctx.remote_addr(),
                    method = %request.method(),
                    path = request.uri().path(),
                    query = request.uri().query().unwrap_or(""),
                    user_agent = request
                        .headers()
                        .get(header::USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(""),
                    "rate limiter missing client id"
                );
                return next.run(ctx, request).await;
            };

            match self.check(&id) {
                Decision::Allowed => next.run(ctx, request).await,
                Decision::Limited => {
                    tracing::debug!(client = %id, "rate limit exceeded");
                    pylon_telemetry::metrics::record_rate_limited();
                    self.too_many_requests()
                }
            }
        })
    }
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug, Clone, Default)]
pub struct RateLimitBuilder {
    config: RateLimitConfig,
}

impl RateLimitBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the route prefixes the limiter applies to.
    ///
    /// Default: `["/api"]`
    #[must_use]
    pub fn prefixes(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets requests allowed per window.
    ///
    /// Default: 10
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.config.limit = limit;
        self
    }

    /// Sets the window length. Values below one millisecond are raised to it.
    ///
    /// Default: 1 second
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Sets the client identifier header.
    ///
    /// Default: `X-Forwarded-For`
    #[must_use]
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.config.header = header.into();
        self
    }

    /// Returns the configuration without starting anything.
    #[must_use]
    pub fn config(self) -> RateLimitConfig {
        self.config
    }

    /// Starts the limiter. See [`RateLimitMiddleware::spawn`].
    pub fn spawn(self) -> RateLimitMiddleware {
        RateLimitMiddleware::spawn(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MiddlewareChain;
    use crate::handler::Handler;
    use crate::types::full;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use proptest::prelude::*;

    fn limiter(limit: u64, interval: Duration) -> RateLimitMiddleware {
        RateLimitMiddleware::builder()
            .limit(limit)
            .interval(interval)
            .spawn()
    }

    fn request(client: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/api/items");
        if let Some(client) = client {
            builder = builder.header("x-forwarded-for", client);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn ok_handler() -> Arc<dyn Handler> {
        Arc::new(|_ctx: &mut MiddlewareContext, _req: Request| async {
            Response::new(full("ok"))
        })
    }

    async fn send(limiter: &Arc<RateLimitMiddleware>, req: Request) -> Response {
        let chain = MiddlewareChain::builder()
            .register_shared(20, Arc::clone(limiter) as Arc<dyn Middleware>)
            .build();
        let mut ctx = MiddlewareContext::new();
        chain.bind("/api/items", ok_handler()).call(&mut ctx, req).await
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitMiddleware::builder().config();
        assert_eq!(config.prefixes(), ["/api"]);
        assert_eq!(config.limit(), 10);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.header(), "X-Forwarded-For");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let config = RateLimitMiddleware::builder()
            .interval(Duration::from_millis(1500))
            .config();
        assert_eq!(config.retry_after(), 2);

        let config = RateLimitMiddleware::builder()
            .interval(Duration::from_secs(60))
            .config();
        assert_eq!(config.retry_after(), 60);

        let config = RateLimitMiddleware::builder()
            .interval(Duration::from_millis(200))
            .config();
        assert_eq!(config.retry_after(), 1);
    }

    #[test]
    fn test_client_id_takes_first_token() {
        assert_eq!(client_id("10.0.0.1"), "10.0.0.1");
        assert_eq!(client_id(" 10.0.0.1 , 192.168.0.1"), "10.0.0.1");
        assert_eq!(client_id(""), "");
        assert_eq!(client_id(" , 10.0.0.1"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_client_id_is_counted() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(1)));

        assert_eq!(send(&limiter, request(Some(", 1.2.3.4"))).await.status(), StatusCode::OK);
        for value in [", 1.2.3.4", " ", ""] {
            assert_eq!(
                send(&limiter, request(Some(value))).await.status(),
                StatusCode::TOO_MANY_REQUESTS
            );
        }
        assert_eq!(limiter.bucket_count(), 1);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised() {
        let config = RateLimitMiddleware::builder()
            .interval(Duration::ZERO)
            .config();
        assert_eq!(config.interval(), MIN_INTERVAL);

        let limiter = Arc::new(limiter(10, Duration::ZERO));
        send(&limiter, request(Some("a"))).await;
        assert_eq!(limiter.bucket_count(), 1);

        // The sweep keeps running and evicts the idle bucket
        tokio::time::sleep(MIN_INTERVAL * 20).await;
        assert_eq!(limiter.bucket_count(), 0);

        let sweeper = limiter.sweeper.lock().take().unwrap();
        assert!(!sweeper.task.is_finished());
        let _ = sweeper.stop.send(());
        sweeper.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_matches_prefixes() {
        let limiter = limiter(1, Duration::from_secs(1));
        assert!(limiter.matches("/api"));
        assert!(limiter.matches("/api/items/{id}"));
        assert!(!limiter.matches("/health"));
        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_then_reject_then_reset() {
        let limiter = Arc::new(limiter(3, Duration::from_secs(1)));

        for _ in 0..3 {
            let response = send(&limiter, request(Some("1.2.3.4"))).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = send(&limiter, request(Some("1.2.3.4"))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"rate limit exceeded\n");

        // Exactly one window later the bucket is still current
        tokio::time::advance(Duration::from_secs(1)).await;
        let response = send(&limiter, request(Some("1.2.3.4"))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::advance(Duration::from_millis(1)).await;
        let response = send(&limiter, request(Some("1.2.3.4"))).await;
        assert_eq!(response.status(), StatusCode::OK);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(1)));

        assert_eq!(send(&limiter, request(Some("a"))).await.status(), StatusCode::OK);
        assert_eq!(
            send(&limiter, request(Some("a, proxy"))).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(send(&limiter, request(Some("b"))).await.status(), StatusCode::OK);
        assert_eq!(limiter.bucket_count(), 2);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_header_is_allowed() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(1)));

        for _ in 0..5 {
            assert_eq!(send(&limiter, request(None)).await.status(), StatusCode::OK);
        }
        assert_eq!(limiter.bucket_count(), 0);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_options_is_not_counted() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(1)));

        for _ in 0..3 {
            let req = http::Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/items")
                .header("x-forwarded-for", "1.2.3.4")
                .body(Full::new(Bytes::new()))
                .unwrap();
            assert_eq!(send(&limiter, req).await.status(), StatusCode::OK);
        }
        assert_eq!(limiter.bucket_count(), 0);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_header() {
        let limiter = Arc::new(
            RateLimitMiddleware::builder()
                .limit(1)
                .header("X-Client-Id")
                .spawn(),
        );

        let req = || {
            http::Request::builder()
                .uri("/api/items")
                .header("x-client-id", "tenant-7")
                .body(Full::new(Bytes::new()))
                .unwrap()
        };
        assert_eq!(send(&limiter, req()).await.status(), StatusCode::OK);
        assert_eq!(send(&limiter, req()).await.status(), StatusCode::TOO_MANY_REQUESTS);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_stale_buckets() {
        let interval = Duration::from_secs(1);
        let limiter = Arc::new(limiter(10, interval));

        send(&limiter, request(Some("stale"))).await;
        tokio::time::sleep(interval * 6).await;
        send(&limiter, request(Some("fresh"))).await;
        assert_eq!(limiter.bucket_count(), 2);

        // First sweep fires at 10 × interval
        tokio::time::sleep(interval * 4 + Duration::from_millis(1)).await;
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(send(&limiter, request(Some("fresh"))).await.status(), StatusCode::OK);

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let limiter = limiter(1, Duration::from_secs(1));
        limiter.shutdown().await;
        limiter.shutdown().await;
    }

    proptest! {
        #[test]
        fn client_id_ignores_proxy_chain(
            id in "[a-zA-Z0-9.:]{1,20}",
            proxies in proptest::collection::vec("[0-9.]{1,15}", 0..4),
        ) {
            let mut value = format!("  {id} ");
            for proxy in &proxies {
                value.push_str(", ");
                value.push_str(proxy);
            }
            prop_assert_eq!(client_id(&value), id.as_str());
        }
    }
}
