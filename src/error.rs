//! Error types for the Stream Gateway.

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Request Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Timeout: no result within {millis} ms")]
    Timeout { millis: u64 },

    #[error("Cancelled: operation was cancelled")]
    Cancelled,

    // ===== Tool Errors =====
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ===== Credential Errors =====
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Gone: token {0} was already consumed or has expired")]
    Gone(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Secret unavailable: {0}")]
    SecretUnavailable(String),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // ===== Internal Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable, machine-readable error code carried in terminal error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Json(_) => "VALIDATION_ERROR",
            Self::ConnectionNotFound(_)
            | Self::ToolNotFound(_)
            | Self::MethodNotFound(_)
            | Self::TokenNotFound(_) => "NOT_FOUND",
            Self::Gone(_) => "GONE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Upstream(_) | Self::Http(_) => "UPSTREAM_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::SecretUnavailable(_) | Self::Io(_) | Self::Config(_) | Self::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// HTTP status used when the error is reported synchronously.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConnectionNotFound(_)
            | Self::ToolNotFound(_)
            | Self::MethodNotFound(_)
            | Self::TokenNotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients.
    ///
    /// Internal failures are collapsed to a generic message so file paths and
    /// configuration values stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Io(_) | Self::Config(_) | Self::Internal(_) | Self::SecretUnavailable(_) => {
                "Internal error".to_string()
            }
            // reqwest errors embed the request URL, which may carry credentials.
            Self::Http(e) if e.is_timeout() => "Upstream error: request timed out".to_string(),
            Self::Http(e) => match e.status() {
                Some(status) => format!("Upstream error: status {}", status.as_u16()),
                None => "Upstream error: request failed".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Check if this error is retriable (transient failures).
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConnectionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Connection not found: abc");

        let timeout = Error::Timeout { millis: 1500 };
        assert_eq!(timeout.to_string(), "Timeout: no result within 1500 ms");

        let gone = Error::Gone("tok-1".to_string());
        assert!(gone.to_string().contains("tok-1"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::ToolNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::TokenNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::Gone("x".into()).code(), "GONE");
        assert_eq!(Error::Timeout { millis: 1 }.code(), "TIMEOUT");
        assert_eq!(Error::Upstream("x".into()).code(), "UPSTREAM_ERROR");
        assert_eq!(Error::Transport("x".into()).code(), "TRANSPORT_ERROR");
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            Error::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::ConnectionNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::Gone("x".into()).status(), StatusCode::GONE);
        assert_eq!(
            Error::Unauthorized("x".into()).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = Error::Config("/etc/secret/licenses.json unreadable".to_string());
        assert_eq!(err.public_message(), "Internal error");

        let err = Error::Upstream("divide by zero".to_string());
        assert_eq!(err.public_message(), "Upstream error: divide by zero");
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::Timeout { millis: 10 }.is_retriable());
        assert!(!Error::Gone("x".into()).is_retriable());
        assert!(!Error::Unauthorized("x".into()).is_retriable());
    }
}
