//! Client error taxonomy.

use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors produced by the duplex message pipeline.
///
/// Lifecycle and protocol errors fail the specific `send` that triggered
/// them. Transport errors terminate the pipeline's background tasks; a
/// caller that observes one must `close()` and `open()` again.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClientError {
    /// `send` was called (or the pipeline was used) while not connected.
    #[error("client is not open")]
    NotOpen,

    /// `open()` was called on an already-open component.
    #[error("client is already open")]
    AlreadyOpen,

    /// The underlying transport failed or was closed by the peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was canceled by the caller or by pipeline shutdown.
    #[error("operation canceled")]
    Canceled,

    /// A waiter registered for a response instead received a notify-shaped
    /// message.
    #[error("expected a response but received a notification")]
    ExpectedResponseGotNotify,

    /// The dispatched message's header had neither a response nor a notify
    /// shape, or its body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// `register` was called with an id already present in the cache.
    #[error("correlation id {0} is already registered")]
    DuplicateCorrelationId(String),

    /// `FrameReader::append` was called after end-of-message.
    #[error("frame reader already reached end of message")]
    AlreadyTerminal,

    /// An operation was attempted on a disposed `FrameReader`.
    #[error("frame reader is closed")]
    Closed,

    /// JSON encoding or decoding failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The underlying byte transport returned an I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
