//! Framing and message-model error types.

use thiserror::Error;

/// Errors from the Content-Length frame codec.
///
/// Every variant is fatal to the stream it was raised on: the codec does
/// not attempt to resynchronise after a bad frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The header block could not be interpreted.
    #[error("malformed frame header: {0}")]
    Framing(String),

    /// The stream ended before the frame was complete.
    #[error("stream closed mid-frame: expected {expected} bytes, received {received}")]
    IncompleteFrame {
        /// Bytes the frame declared (or header bytes still pending).
        expected: usize,
        /// Bytes actually read before the stream closed.
        received: usize,
    },

    /// The declared payload length exceeds the configured limit.
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared Content-Length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from interpreting a frame payload as a protocol message.
///
/// None of these close the stream.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload was not valid JSON or did not match the envelope shape.
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload has no `type` discriminator.
    #[error("message has no `type` field")]
    MissingType,

    /// The `type` discriminator is not request, response or event.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A known command or event carried a payload of the wrong shape.
    #[error("invalid payload for `{name}`: {reason}")]
    InvalidArguments {
        /// The command or event name.
        name: String,
        /// Deserializer diagnostic.
        reason: String,
    },
}
