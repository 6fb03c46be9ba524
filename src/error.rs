//! Error types for the market data client

use std::time::Duration;
use thiserror::Error;

/// Market data client errors
#[derive(Error, Debug)]
pub enum DataserError {
    /// Server unreachable or connection refused
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connect or read deadline exceeded
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Login rejected by the server
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bad header, failed decompression or unparseable body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server closed the stream (zero-length read)
    #[error("Connection closed by remote")]
    RemoteClosed,

    /// Any other I/O fault, treated as non-transient
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    /// A pending call lost its registration before a response arrived
    #[error("Request cancelled: {0}")]
    Cancelled(String),
}

impl DataserError {
    /// Whether the receive loop should rebuild the connection for this error
    pub fn is_transient(&self) -> bool {
        matches!(self, DataserError::Timeout(_) | DataserError::Protocol(_))
    }
}

impl From<serde_json::Error> for DataserError {
    fn from(err: serde_json::Error) -> Self {
        DataserError::Protocol(err.to_string())
    }
}

impl From<config::ConfigError> for DataserError {
    fn from(err: config::ConfigError) -> Self {
        DataserError::Config(err.to_string())
    }
}

impl From<prometheus::Error> for DataserError {
    fn from(err: prometheus::Error) -> Self {
        DataserError::Metrics(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = DataserError::Authentication("bad secret".to_string());
        assert!(e.to_string().contains("bad secret"));

        let e = DataserError::Timeout(Duration::from_secs(3));
        assert!(e.to_string().contains("3s"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DataserError::Timeout(Duration::from_millis(10)).is_transient());
        assert!(DataserError::Protocol("short header".into()).is_transient());
        assert!(!DataserError::RemoteClosed.is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        assert!(!DataserError::from(io).is_transient());
    }

    #[test]
    fn test_from_json_error_is_protocol() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(DataserError::from(err), DataserError::Protocol(_)));
    }
}
