//! Error types for session bootstrap
//!
//! Errors are classified by recoverability:
//! - Transient: identity endpoint unavailable, widget timeouts, backend lookups
//! - Permanent: malformed tokens, bad configuration, storage failures
//!
//! Acquisition and advisor resolution absorb their errors into the next
//! fallback tier. Only manual token input, `check_backend` and the
//! dashboard client surface them to callers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while acquiring or validating a credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Token is empty")]
    EmptyToken,

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Identity widget failed to load: {0}")]
    WidgetLoad(String),

    #[error("Identity widget error: {0}")]
    Widget(String),

    #[error("Sign-in flow cancelled")]
    FlowCancelled,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Returns true if a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            AuthError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            AuthError::Timeout(_)
            | AuthError::WidgetLoad(_)
            | AuthError::Widget(_)
            | AuthError::Io(_) => true,
            AuthError::EmptyToken
            | AuthError::InvalidToken(_)
            | AuthError::FlowCancelled
            | AuthError::Json(_) => false,
        }
    }

    /// Returns true if the backend rejected the credential itself.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Status { status, .. } if *status == 401 || *status == 403)
    }
}

/// Errors from the durable session storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist {path}: {message}")]
    Persist { path: PathBuf, message: String },
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let unavailable = AuthError::Status {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_unauthorized());

        let forbidden = AuthError::Status {
            status: 403,
            message: "forbidden".into(),
        };
        assert!(!forbidden.is_transient());
        assert!(forbidden.is_unauthorized());
    }

    #[test]
    fn test_token_errors_are_permanent() {
        assert!(!AuthError::EmptyToken.is_transient());
        assert!(!AuthError::InvalidToken("bad".into()).is_transient());
        assert!(AuthError::Timeout(Duration::from_secs(10)).is_transient());
    }
}
