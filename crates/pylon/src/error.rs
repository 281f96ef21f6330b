//! Application error type.

use pylon_config::ConfigError;
use pylon_core::CoreError;
use pylon_middleware::stages::TokenError;
use pylon_server::ServerError;
use pylon_telemetry::TelemetryError;
use thiserror::Error;

/// Errors that stop the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Runtime could not be created.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging or metrics could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// A server could not be built or the server group failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A configured auth token is malformed.
    #[error("invalid auth token: {0}")]
    Token(#[from] TokenError),
}

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_is_transparent() {
        let err = AppError::from(ServerError::NoServers);
        assert_eq!(err.to_string(), "no servers found in server context");
    }

    #[test]
    fn test_token_error_message() {
        let err = AppError::from(TokenError::ContainsSeparator);
        assert_eq!(err.to_string(), "invalid auth token: token must not contain comma");
    }
}
