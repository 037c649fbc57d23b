//! Error types for the OpenCollection runner

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type shared across runner crates
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be prepared for sending
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level transport failure (no response was received)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport call exceeded its deadline
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// The run was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// A script hook failed
    #[error("{0}")]
    Script(String),

    /// Requested item does not exist in the collection
    #[error("Request not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error represents a caller-initiated cancellation
    pub fn is_cancel(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_message_is_verbatim() {
        let err = Error::Script("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_cancel_detection() {
        assert!(Error::Cancelled.is_cancel());
        assert!(!Error::Transport("refused".into()).is_cancel());
    }
}
