/*!
Common error types for the MantisCam control components.
*/

use thiserror::Error;

/// Common result type used throughout the workspace
pub type Result<T> = std::result::Result<T, CameraError>;

/// Comprehensive error type for camera control operations
#[derive(Error, Debug)]
pub enum CameraError {
    /// Transport could not be established at all
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A command could not be delivered after retries
    #[error("Operation failed: {message}")]
    Operation {
        message: String,
        #[source]
        source: Option<Box<CameraError>>,
    },

    /// A verification, frame wait or recording transition did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Caller passed an argument the protocol does not support
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport-level failure on a single endpoint (send, poll, receive)
    #[error("Link error: {0}")]
    Link(String),

    /// Frame payload could not be turned into an array
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O errors (shared memory, probes, files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CameraError {
    /// Create a connection failure
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create an operation error without an underlying cause
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an operation error wrapping the last underlying failure
    pub fn operation_caused_by(msg: impl Into<String>, source: CameraError) -> Self {
        Self::Operation {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a link error
    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the timeout kind
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for the operation kind
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation { .. })
    }
}
