//! The error type which is shared by the client, the backends and the provider.

use std::time::Duration;

/// A shorthand for results which fail with a [`LokiError`].
pub type Result<T> = std::result::Result<T, LokiError>;

/// Everything which can go wrong while building a provider or pushing a log entry to Loki.
#[derive(Debug, thiserror::Error)]
pub enum LokiError {
    /// The payload could not be encoded as JSON
    #[error("failed to marshal Loki payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request never got a response (connection refused, timeout, TLS, ...)
    #[error("failed to send log to Loki: {0}")]
    Transport(String),

    /// Loki answered with something else than `200 OK` or `204 No Content`
    #[error("loki returned non-ok status: {status}")]
    Status { status: u16 },

    /// A configuration value was rejected while building a client or provider
    #[error("invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// A worker thread could not be spawned
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pending pushes did not finish before the deadline
    #[error("timed out after {0:?} waiting for pending log pushes")]
    FlushTimeout(Duration),
}

impl LokiError {
    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LokiError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a transport error from anything printable
    pub fn transport(error: impl std::fmt::Display) -> Self {
        LokiError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_mention_the_status_code() {
        let err = LokiError::Status { status: 500 };
        assert_eq!(err.to_string(), "loki returned non-ok status: 500");
    }

    #[test]
    fn configuration_errors_name_the_component() {
        let err = LokiError::config("LokiConfig", "url cannot be a base");
        assert!(matches!(err, LokiError::InvalidConfiguration { .. }));
        assert_eq!(
            err.to_string(),
            "invalid configuration for LokiConfig: url cannot be a base"
        );
    }

    #[test]
    fn transport_errors_keep_the_underlying_message() {
        let err = LokiError::transport("connection refused");
        assert_eq!(
            err.to_string(),
            "failed to send log to Loki: connection refused"
        );
    }
}
