//! Common types used throughout the middleware chain.
//!
//! Requests carry a fully-read body. Responses carry a boxed streaming body
//! so that stages such as compression can wrap it without buffering.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use std::convert::Infallible;

/// Error type carried by response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The HTTP request type used in the middleware chain.
pub type Request = http::Request<Full<Bytes>>;

/// Streaming response body.
pub type ResponseBody = BoxBody<Bytes, BoxError>;

/// The HTTP response type used in the middleware chain.
pub type Response = http::Response<ResponseBody>;

/// Wraps bytes in a response body.
pub fn full(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// An empty response body.
pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// Extension trait for building plain responses.
pub trait ResponseExt {
    /// Plain-text error response: the message followed by a newline, with
    /// `X-Content-Type-Options: nosniff`.
    fn error(status: StatusCode, message: &str) -> Response;

    /// JSON response.
    fn json(status: StatusCode, value: &serde_json::Value) -> Response;
}

impl ResponseExt for Response {
    fn error(status: StatusCode, message: &str) -> Response {
        let mut response = Response::new(full(format!("{message}\n")));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        response
    }

    fn json(status: StatusCode, value: &serde_json::Value) -> Response {
        let mut response = Response::new(full(value.to_string()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
