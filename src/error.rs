use thiserror::Error;

/// Errors that can occur while dialing, listening, or exchanging messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A caller-visible wait exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The socket, client, listener, or bus connection is closed.
    #[error("resource is closed")]
    Closed,

    /// The virtual socket was closed and every buffered message has been read.
    #[error("end of stream")]
    Eof,

    /// Encoding or decoding a [`Message`](crate::Message) failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The underlying message bus reported a failure.
    #[error("bus error: {0}")]
    Bus(String),

    /// Required configuration is missing.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    /// Conflicting configuration options were supplied.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// The operation is not supported by this transport.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        // ---
        TransportError::Codec(err.to_string())
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_json_error_maps_to_codec() {
        // ---
        let err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err = TransportError::from(err);
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn test_display() {
        // ---
        assert_eq!(TransportError::Eof.to_string(), "end of stream");
        assert_eq!(
            TransportError::Bus("connection reset".into()).to_string(),
            "bus error: connection reset"
        );
    }
}
