//! Common error types for the streaming core.

use serde::Serialize;
use thiserror::Error;

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while ingesting or deriving stream data.
///
/// Decode errors are recovered locally at the ingestion boundary (the bad
/// payload is logged and dropped); they are never fatal to the stream.
/// `WindowActive` is the synchronous rejection for starting a measurement
/// window while one is already running: no state is mutated.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Store request error: {0}")]
    Store(#[from] reqwest::Error),

    #[error("Store rejected write: HTTP {0}")]
    StoreStatus(u16),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Measurement window already running")]
    WindowActive,
}

impl StreamError {
    /// Stable machine-readable tag, used in JSON error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Connection(_) => "connection",
            StreamError::Decode(_) => "decode",
            StreamError::Store(_) | StreamError::StoreStatus(_) => "store",
            StreamError::InvalidConfig(_) => "invalid_config",
            StreamError::WindowActive => "window_active",
        }
    }
}

/// JSON body returned by route handlers on failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<&StreamError> for ErrorBody {
    fn from(e: &StreamError) -> Self {
        ErrorBody {
            error: e.kind(),
            message: e.to_string(),
        }
    }
}

// ---
