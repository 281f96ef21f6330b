//! Bearer token authentication.
//!
//! [`AuthMiddleware`] requires `Authorization: Bearer <token>` on routes
//! under its prefixes and hands the token to a [`TokenValidator`]. The
//! stock validator, [`StaticTokenProvider`], accepts a fixed set of tokens
//! and identifies each one by the SHA-256 digest of the token.
//!
//! | Outcome | Status |
//! |---------|--------|
//! | no header, wrong scheme, unknown token | 401 with `WWW-Authenticate: Bearer` |
//! | validator backend unavailable | 503 |
//! | any other validator failure | 500 |
//!
//! Pre-flight `OPTIONS` requests always pass.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::{header, HeaderValue, Method, StatusCode};
use pylon_core::AuthInfo;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Why a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token is not recognized.
    #[error("unauthorized")]
    Unauthorized,

    /// The validation backend could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any other validation failure.
    #[error("authentication failed: {0}")]
    Internal(String),
}

/// Invalid token configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// A configured token contains the list separator.
    #[error("token must not contain comma")]
    ContainsSeparator,
}

/// Resolves a bearer token to an identity.
pub trait TokenValidator: Send + Sync + 'static {
    /// Validates `token`.
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthInfo, AuthError>>;
}

/// Validator over a fixed set of tokens, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    allowed: HashMap<String, AuthInfo>,
}

impl StaticTokenProvider {
    /// Builds the allowed set. Tokens are trimmed and blanks are skipped;
    /// a token containing `,` is rejected.
    pub fn new<I, S>(tokens: I) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = HashMap::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            if token.contains(',') {
                return Err(TokenError::ContainsSeparator);
            }
            let hashed = hash_token(token);
            allowed.insert(token.to_string(), AuthInfo::new(hashed.clone(), hashed));
        }
        Ok(Self { allowed })
    }

    /// Number of distinct accepted tokens.
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// Whether no tokens are accepted.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl TokenValidator for StaticTokenProvider {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthInfo, AuthError>> {
        let result = self.allowed.get(token).cloned().ok_or(AuthError::Unauthorized);
        Box::pin(async move { result })
    }
}

/// Lowercase hex SHA-256 of `token`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Bearer token middleware.
#[derive(Clone)]
pub struct AuthMiddleware {
    prefixes: Vec<String>,
    validator: Arc<dyn TokenValidator>,
}

impl AuthMiddleware {
    /// Creates the middleware for routes under `prefixes`.
    pub fn new(
        prefixes: impl IntoIterator<Item = impl Into<String>>,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            validator,
        }
    }

    /// Route prefixes the gate applies to.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn unauthorized(message: &str) -> Response {
        let mut response = Response::error(StatusCode::UNAUTHORIZED, message);
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware")
            .field("prefixes", &self.prefixes)
            .finish_non_exhaustive()
    }
}

/// Extracts the token from an `Authorization` value of the form
/// `Bearer <token>` (scheme case-insensitive).
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn matches(&self, pattern: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| pattern.starts_with(prefix.as_str()))
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if request.method() == Method::OPTIONS {
                return next.run(ctx, request).await;
            }

            let Some(value) = request.headers().get(header::AUTHORIZATION) else {
                pylon_telemetry::metrics::record_auth_rejected("missing");
                return Self::unauthorized("Authorization header is missing");
            };

            let Some(token) = value.to_str().ok().and_then(bearer_token) else {
                pylon_telemetry::metrics::record_auth_rejected("malformed");
                return Self::unauthorized("invalid Authorization header");
            };

            let result = self.validator.validate(token).await;
            match result {
                Ok(auth) => {
                    tracing::debug!(subject = auth.subject(), "request authenticated");
                    request.extensions_mut().insert(auth.clone());
                    ctx.set_auth(auth);
                    next.run(ctx, request).await
                }
                Err(e @ AuthError::Unauthorized) => {
                    pylon_telemetry::metrics::record_auth_rejected("unauthorized");
                    Self::unauthorized(&e.to_string())
                }
                Err(e @ AuthError::ServiceUnavailable(_)) => {
                    tracing::warn!(error = %e, "token validation backend unavailable");
                    pylon_telemetry::metrics::record_auth_rejected("unavailable");
                    Response::error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
                }
                Err(e @ AuthError::Internal(_)) => {
                    tracing::error!(error = %e, "token validation failed");
                    pylon_telemetry::metrics::record_auth_rejected("error");
                    Response::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
                }
            }
        })
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

    struct FailingValidator(AuthError);

    impl TokenValidator for FailingValidator {
        fn validate<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, Result<AuthInfo, AuthError>> {
            let err = self.0.clone();
            Box::pin(async move { Err(err) })
        }
    }

    /// Echoes the authenticated subject.
    fn subject_handler() -> Arc<dyn Handler> {
        Arc::new(|ctx: &mut MiddlewareContext, req: Request| {
            let subject = ctx.auth().map(|a| a.subject().to_string()).unwrap_or_default();
            let from_ext = req.extensions().get::<AuthInfo>().is_some();
            async move {
                let mut response = Response::new(full(subject));
                if !from_ext {
                    *response.status_mut() = StatusCode::IM_A_TEAPOT;
                }
                response
            }
        })
    }

    fn gate(tokens: &[&str]) -> AuthMiddleware {
        let provider = StaticTokenProvider::new(tokens.iter().copied()).unwrap();
        AuthMiddleware::new(["/api"], Arc::new(provider))
    }

    async fn send(gate: AuthMiddleware, method: Method, auth: Option<&str>) -> Response {
        let mut builder = http::Request::builder().method(method).uri("/api/me");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let req = builder.body(Full::new(Bytes::new())).unwrap();

        let chain = MiddlewareChain::builder().register(30, gate).build();
        let mut ctx = MiddlewareContext::new();
        chain.bind("/api/me", subject_handler()).call(&mut ctx, req).await
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_provider_trims_and_skips_blank() {
        let provider = StaticTokenProvider::new([" alpha ", "", "   ", "beta"]).unwrap();
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn test_provider_rejects_comma() {
        let err = StaticTokenProvider::new(["good", "bad,token"]).unwrap_err();
        assert_eq!(err, TokenError::ContainsSeparator);
        assert_eq!(err.to_string(), "token must not contain comma");
    }

    #[tokio::test]
    async fn test_provider_validate() {
        let provider = StaticTokenProvider::new(["alpha"]).unwrap();
        let info = provider.validate("alpha").await.unwrap();
        assert_eq!(info.hashed_token(), hash_token("alpha"));
        assert_eq!(info.subject(), info.hashed_token());
        assert_eq!(provider.validate("beta").await, Err(AuthError::Unauthorized));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }

    #[test]
    fn test_matches_prefixes() {
        let gate = gate(&["t"]);
        assert!(gate.matches("/api/me"));
        assert!(!gate.matches("/health"));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let response = send(gate(&["t"]), Method::GET, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
        assert_eq!(body_string(response).await, "Authorization header is missing\n");
    }

    #[tokio::test]
    async fn test_malformed_header() {
        let response = send(gate(&["t"]), Method::GET, Some("Token t")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
        assert_eq!(body_string(response).await, "invalid Authorization header\n");
    }

    #[tokio::test]
    async fn test_wrong_token() {
        let response = send(gate(&["t"]), Method::GET, Some("Bearer wrongtoken")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let response = send(gate(&["s3cret"]), Method::GET, Some("Bearer s3cret")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, hash_token("s3cret"));
    }

    #[tokio::test]
    async fn test_options_passes() {
        let response = send(gate(&["t"]), Method::OPTIONS, None).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_backend_unavailable_is_503() {
        let gate = AuthMiddleware::new(
            ["/api"],
            Arc::new(FailingValidator(AuthError::ServiceUnavailable("down".into()))),
        );
        let response = send(gate, Method::GET, Some("Bearer t")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_other_failure_is_500() {
        let gate = AuthMiddleware::new(
            ["/api"],
            Arc::new(FailingValidator(AuthError::Internal("boom".into()))),
        );
        let response = send(gate, Method::GET, Some("Bearer t")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
