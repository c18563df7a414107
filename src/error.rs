//! Error types for the streaming recognition client.

/// Error type covering every failure class a session can report.
///
/// Errors are cheap to clone so the same value can be returned to the caller
/// and delivered through the session's error callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UspError {
    /// The transport could not be established (handshake failure, timeout).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The service rejected the session credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session configuration is locally invalid.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The established transport failed (write error, unexpected close).
    #[error("network error: {0}")]
    NetworkError(String),

    /// The service sent data this client cannot decode or that violates
    /// the message-ordering contract.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// An operation was attempted in a session state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A bounded wait elapsed before the session reached the awaited state.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A registered callback panicked while handling an event.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

impl UspError {
    /// True for errors that end the session (transport and protocol
    /// failures). Usage errors and handler failures leave the session state
    /// untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::AuthenticationFailed(_)
                | Self::NetworkError(_)
                | Self::ProtocolError(_)
                | Self::Timeout(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type UspResult<T> = Result<T, UspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(UspError::NetworkError("drop".into()).is_fatal());
        assert!(UspError::ProtocolError("bad frame".into()).is_fatal());
        assert!(!UspError::InvalidState("closed".into()).is_fatal());
        assert!(!UspError::HandlerFailed("panic".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = UspError::InvalidState("cannot submit audio while session is closed".into());
        assert!(err.to_string().contains("cannot submit audio"));
    }
}
