//! Error types for n8n webhook dispatch
//!
//! `N8nError` is what callers of the client see. Retry classification lives
//! here so the retry policy and the transport agree on what is transient.

use thiserror::Error;

use crate::types::CommunicationMode;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, N8nError>;

/// Errors produced while dispatching requests to n8n or resolving callbacks.
#[derive(Debug, Clone, Error)]
pub enum N8nError {
    /// The transport gave up waiting for n8n.
    #[error("n8n webhook request timed out: {message}")]
    Timeout { message: String },

    /// n8n answered with a non-success status, or the request never made it.
    ///
    /// `status_code` is 0 when no HTTP response was received.
    #[error("n8n webhook returned error (HTTP {status_code}): {message}")]
    Communication { status_code: u16, message: String },

    /// The circuit breaker rejected the call before any I/O happened.
    #[error("circuit breaker is open for client '{client_id}' - n8n temporarily unavailable")]
    CircuitOpen { client_id: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A callback arrived for a correlation id nobody is waiting on.
    #[error("no pending request for correlation id {0}")]
    TrackingMiss(String),

    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(String),

    #[error("invalid callback payload: {0}")]
    InvalidCallback(String),

    #[error("{0} mode cannot be dispatched through send(); use send_with_callback()")]
    UnsupportedMode(CommunicationMode),

    #[error("configuration error: {0}")]
    Config(String),
}

impl N8nError {
    /// Build a communication error for a transport-level failure (no status).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Communication {
            status_code: 0,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Communication { status_code, .. } if *status_code > 0 => Some(*status_code),
            _ => None,
        }
    }

    /// Default retry classification: timeouts and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Communication { status_code, .. } => (500..600).contains(status_code),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for N8nError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                message: err.to_string(),
            };
        }
        Self::transport(format!("failed to send webhook to n8n: {err}"))
    }
}

/// Errors raised while projecting response data onto a registered shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("response shape '{0}' is not registered")]
    UnknownShape(String),

    #[error("response shape '{0}' has neither a constructor nor a default factory")]
    Unconstructible(String),

    #[error("required parameter '{field}' for shape '{shape}' not found in response data")]
    MissingField { shape: String, field: String },

    #[error("parameter '{field}' for shape '{shape}' has the wrong type: {message}")]
    InvalidField {
        shape: String,
        field: String,
        message: String,
    },

    #[error("response data is not an object: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = N8nError::Timeout {
            message: "slow".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_communication_retryable_only_for_5xx() {
        let server = N8nError::Communication {
            status_code: 503,
            message: "unavailable".to_string(),
        };
        let client = N8nError::Communication {
            status_code: 404,
            message: "missing".to_string(),
        };
        let transport = N8nError::transport("connection refused");

        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(!transport.is_retryable());
        assert_eq!(server.status_code(), Some(503));
        assert_eq!(transport.status_code(), None);
    }

    #[test]
    fn test_circuit_open_never_retryable() {
        let err = N8nError::CircuitOpen {
            client_id: "main".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("main"));
    }
}
