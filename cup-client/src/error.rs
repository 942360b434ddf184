//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport could not be established or broke mid-session
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP request failed (SSE dial)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be decoded
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    /// Bad configuration (unparsable endpoint, zero delays, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The peer closed the connection
    #[error("Connection closed")]
    Closed,

    /// No frame arrived within the inactivity window
    #[error("Idle timeout after {0:?}")]
    IdleTimeout(std::time::Duration),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
