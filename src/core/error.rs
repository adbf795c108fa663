use std::io;
use thiserror::Error;

/// Custom error types for the Firmata host engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Link not ready: {0}")]
    LinkNotReady(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new encode error
    pub fn encode(msg: impl Into<String>) -> Self {
        Error::Encode(msg.into())
    }

    /// Creates a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Creates a new link-not-ready error
    pub fn link_not_ready(msg: impl Into<String>) -> Self {
        Error::LinkNotReady(msg.into())
    }

    /// Creates a new connection-lost error
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Error::ConnectionLost(msg.into())
    }

    /// Returns true for errors that the ingestion loop recovers from
    /// by resetting decoder state and continuing with the next byte
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::decode("test error");
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.to_string(), "Decode error: test error");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::decode("bad byte").is_recoverable());
        assert!(!Error::connection_lost("port closed").is_recoverable());
        assert!(!Error::encode("value out of range").is_recoverable());
    }
}
