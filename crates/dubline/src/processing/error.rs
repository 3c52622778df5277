//! Processing service error types.

use thiserror::Error;

/// Errors returned by a processing backend call.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The service answered with a non-success status.
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: u16,
        message: String,
    },

    /// The call timed out before a response arrived.
    #[error("{endpoint} timed out: {message}")]
    Timeout {
        endpoint: &'static str,
        message: String,
    },

    /// Connection or transport failure.
    #[error("{endpoint} request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("{endpoint} returned an unexpected body: {message}")]
    MalformedResponse {
        endpoint: &'static str,
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl ProcessingError {
    /// Non-success responses, timeouts and transport failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::Status { .. }
                | ProcessingError::Timeout { .. }
                | ProcessingError::Transport { .. }
        )
    }

    pub(crate) fn from_reqwest(endpoint: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProcessingError::Timeout {
                endpoint,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ProcessingError::MalformedResponse {
                endpoint,
                message: err.to_string(),
            }
        } else {
            ProcessingError::Transport {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let status = ProcessingError::Status {
            endpoint: "/tts",
            status: 500,
            message: "model crashed".into(),
        };
        assert!(status.is_retryable());
        assert_eq!(status.to_string(), "/tts returned 500: model crashed");

        let malformed = ProcessingError::MalformedResponse {
            endpoint: "/mt",
            message: "missing field `sw_text`".into(),
        };
        assert!(!malformed.is_retryable());
        assert!(!ProcessingError::Client("tls".into()).is_retryable());
    }
}
