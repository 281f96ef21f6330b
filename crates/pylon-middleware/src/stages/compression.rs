//! Adaptive gzip compression.
//!
//! Inbound, a request body declared as gzip is decompressed before the
//! handler sees it. A body that is not valid gzip gets `400`, one that
//! inflates past `max_request_size` gets `413`. Outbound, the response body is buffered until either
//! it ends or `threshold` bytes have been seen:
//!
//! - ends below the threshold: sent as-is with an exact `Content-Length`
//! - crosses the threshold: switches once to gzip, sets
//!   `Content-Encoding: gzip` and `Vary: Accept-Encoding`, drops
//!   `Content-Length`, and streams everything else through the encoder
//!
//! Clients that do not list `gzip` in `Accept-Encoding`, and `HEAD`
//! requests, bypass the outbound side entirely.
//!
//! ## Example
//!
//! ```
//! use pylon_middleware::stages::CompressionMiddleware;
//! use pylon_middleware::Middleware;
//!
//! let compression = CompressionMiddleware::builder()
//!     .level(6)
//!     .threshold(512)
//!     .skip(["/images"])
//!     .build();
//!
//! assert!(compression.matches("/api/items"));
//! assert!(!compression.matches("/images/{name}"));
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{full, BoxError, Request, Response, ResponseBody, ResponseExt};
use bytes::{Bytes, BytesMut};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, Full, StreamBody};
use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Default gzip level.
pub const DEFAULT_LEVEL: u32 = 1;

/// Default buffering threshold in bytes.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Default cap on an inflated request body, in bytes.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Default route prefixes that are never compressed.
pub const DEFAULT_SKIP: &[&str] = &["/images", "/videos", "/ws"];

/// Compression middleware configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    level: u32,
    threshold: usize,
    skip: Vec<String>,
    max_request_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            threshold: DEFAULT_THRESHOLD,
            skip: DEFAULT_SKIP.iter().map(|s| (*s).to_string()).collect(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl CompressionConfig {
    /// Gzip level, 0-9.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Buffering threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Route prefixes that are never compressed.
    pub fn skip(&self) -> &[String] {
        &self.skip
    }

    /// Largest inflated request body accepted, in bytes.
    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }
}

/// Adaptive gzip middleware.
#[derive(Debug, Clone, Default)]
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    /// Creates the middleware with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CompressionBuilder {
        CompressionBuilder::new()
    }

    /// Current configuration.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    fn gzip_level(&self) -> Compression {
        Compression::new(self.config.level.min(9))
    }

    async fn compress_response(&self, response: Response) -> Response {
        if response.headers().contains_key(header::CONTENT_ENCODING) {
            return response;
        }

        let (mut parts, mut body) = response.into_parts();
        let mut buf = BytesMut::new();

        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "response body failed before compression decision");
                    return Response::error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error",
                    );
                }
            };

            match frame.into_data() {
                Ok(data) => {
                    buf.extend_from_slice(&data);
                    if buf.len() >= self.config.threshold {
                        return self.start_gzip(parts, buf.freeze(), body);
                    }
                }
                Err(frame) => {
                    // Trailers end the body; send what was buffered uncompressed.
                    let trailers = frame.into_trailers().ok();
                    set_content_length(&mut parts.headers, parts.status, buf.len());
                    return Response::from_parts(parts, buffered_body(buf.freeze(), trailers));
                }
            }
        }

        set_content_length(&mut parts.headers, parts.status, buf.len());
        Response::from_parts(parts, full(buf.freeze()))
    }

    fn start_gzip(
        &self,
        mut parts: http::response::Parts,
        buffered: Bytes,
        rest: ResponseBody,
    ) -> Response {
        let mut encoder = GzEncoder::new(Vec::new(), self.gzip_level());
        if let Err(e) = encoder.write_all(&buffered) {
            tracing::warn!(error = %e, "gzip encoder rejected buffered body");
            return Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }

        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts
            .headers
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        parts.headers.remove(header::CONTENT_LENGTH);
        pylon_telemetry::metrics::record_compressed();

        let body = GzipBody {
            inner: rest,
            encoder: Some(encoder),
            trailers: None,
        };
        Response::from_parts(parts, body.boxed())
    }
}

/// Whether the request body declares gzip encoding.
fn has_gzip_body(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"))
}

/// Whether `Accept-Encoding` lists `gzip` as one of its tokens.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim() == "gzip")
}

/// Why an inbound gzip body was refused.
#[derive(Debug)]
enum InflateError {
    Malformed(std::io::Error),
    TooLarge,
}

impl InflateError {
    fn into_response(self) -> Response {
        match self {
            Self::Malformed(e) => {
                tracing::debug!(error = %e, "rejecting malformed gzip request body");
                Response::error(StatusCode::BAD_REQUEST, "invalid gzip request body")
            }
            Self::TooLarge => {
                tracing::debug!("rejecting oversized gzip request body");
                Response::error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
            }
        }
    }
}

async fn decompress_request(request: Request, limit: usize) -> Result<Request, InflateError> {
    let (mut parts, body) = request.into_parts();
    let compressed = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    // One byte past the limit is enough to tell an oversized body apart.
    let mut decoded = Vec::new();
    MultiGzDecoder::new(compressed.as_ref())
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut decoded)
        .map_err(InflateError::Malformed)?;
    if decoded.len() > limit {
        return Err(InflateError::TooLarge);
    }

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Full::new(Bytes::from(decoded))))
}

fn set_content_length(headers: &mut HeaderMap, status: StatusCode, len: usize) {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return;
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn buffered_body(data: Bytes, trailers: Option<HeaderMap>) -> ResponseBody {
    let Some(trailers) = trailers else {
        return full(data);
    };
    let frames = vec![
        Ok::<_, BoxError>(Frame::data(data)),
        Ok(Frame::trailers(trailers)),
    ];
    StreamBody::new(stream::iter(frames)).boxed()
}

impl Middleware for CompressionMiddleware {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn matches(&self, pattern: &str) -> bool {
        !self.config.skip.iter().any(|prefix| pattern.starts_with(prefix.as_str()))
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request = if has_gzip_body(&request) {
                match decompress_request(request, self.config.max_request_size).await {
                    Ok(request) => request,
                    Err(e) => return e.into_response(),
                }
            } else {
                request
            };

            let bypass = request.method() == Method::HEAD || !accepts_gzip(request.headers());
            let response = next.run(ctx, request).await;
            if bypass {
                return response;
            }

            self.compress_response(response).await
        })
    }
}

/// Response body that streams the rest of the inner body through gzip.
struct GzipBody {
    inner: ResponseBody,
    encoder: Option<GzEncoder<Vec<u8>>>,
    trailers: Option<HeaderMap>,
}

impl GzipBody {
    /// Takes whatever compressed output is ready.
    fn drain(encoder: &mut GzEncoder<Vec<u8>>) -> Option<Bytes> {
        let out = std::mem::take(encoder.get_mut());
        (!out.is_empty()).then(|| Bytes::from(out))
    }

    /// Finishes the gzip stream, returning the final bytes.
    fn finish(&mut self) -> Result<Option<Bytes>, BoxError> {
        match self.encoder.take() {
            Some(encoder) => {
                let out = encoder.finish()?;
                Ok((!out.is_empty()).then(|| Bytes::from(out)))
            }
            None => Ok(None),
        }
    }
}

impl Body for GzipBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            };

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        if let Err(e) = encoder.write_all(&data) {
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        if let Some(out) = Self::drain(encoder) {
                            return Poll::Ready(Some(Ok(Frame::data(out))));
                        }
                    }
                    Err(frame) => {
                        this.trailers = frame.into_trailers().ok();
                        match this.finish() {
                            Ok(Some(out)) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                            Ok(None) => {}
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }
                },
                Some(Err(e)) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    return Poll::Ready(match this.finish() {
                        Ok(Some(out)) => Some(Ok(Frame::data(out))),
                        Ok(None) => None,
                        Err(e) => Some(Err(e)),
                    });
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none() && self.trailers.is_none()
    }
}

/// Builder for [`CompressionMiddleware`].
#[derive(Debug, Clone, Default)]
pub struct CompressionBuilder {
    config: CompressionConfig,
}

impl CompressionBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gzip level (clamped to 9).
    ///
    /// Default: 1
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.config.level = level.min(9);
        self
    }

    /// Sets the buffering threshold in bytes.
    ///
    /// Default: 1024
    #[must_use]
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.config.threshold = threshold;
        self
    }

    /// Caps the inflated size of gzip request bodies.
    ///
    /// Default: 10 MiB
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    /// Replaces the skipped route prefixes.
    #[must_use]
    pub fn skip(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.skip = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> CompressionMiddleware {
        CompressionMiddleware {
            config: self.config,
        }
    }
}
