//! Error types for the worker client

use thiserror::Error;

/// Result type alias for worker RPC operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur talking to a container host
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connection refused, timeout, ...)
    #[error("worker request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The agent returned an error status code
    #[error("worker API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the agent
        message: String,
    },

    /// Failed to parse response
    #[error("failed to parse worker response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Whether the agent reported the target missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Transient transport/server faults worth retrying on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
            Self::ParseError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(ClientError::api_error(404, "no such container").is_not_found());
        assert!(!ClientError::api_error(500, "boom").is_not_found());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::api_error(503, "busy").is_retryable());
        assert!(!ClientError::api_error(422, "bad spec").is_retryable());
        assert!(!ClientError::ParseError("x".to_string()).is_retryable());
    }
}
