//! Error types for DiscordWave

use thiserror::Error;

/// Result type alias using DiscordWave's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for DiscordWave
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure; triggers the reconnect policy
    #[error("Connection error: {0}")]
    Connection(String),

    /// Send attempted on a transport that is not connected
    #[error("Send error: {0}")]
    Send(String),

    /// Malformed or unexpected envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame could not be decoded into an envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// Outbound queue is full; the caller may retry later
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// An application callback failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Credentials or capabilities rejected by the remote endpoint
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    /// REST API answered with an error status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The engine has been shut down
    #[error("Closed: {0}")]
    Closed(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Http(_)
                | Error::WebSocket(_)
                | Error::RateLimited(_)
                | Error::Timeout(_)
        )
    }

    /// Check if error must stop the engine without retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalConfig(_) | Error::Config(_))
    }

    /// Wrap a handler failure so it can be reported without leaking the callback's type
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Error::Handler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Connection("reset".into()).is_retryable());
        assert!(Error::Timeout("hello".into()).is_retryable());
        assert!(Error::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed).is_retryable());
        assert!(!Error::Protocol("bad op".into()).is_retryable());

        assert!(Error::FatalConfig("4004".into()).is_fatal());
        assert!(!Error::Handler("boom".into()).is_fatal());
    }

    #[test]
    fn test_handler_wrapper_keeps_message() {
        let err = Error::handler("database unavailable");
        assert_eq!(err.to_string(), "Handler error: database unavailable");
    }
}
