//! Session engine error types.

use dapline_proto::{ErrorMessage, FrameError, MessageError};
use thiserror::Error;

use crate::lifecycle::SessionState;

/// Identifiers carried in the `body.error.id` of failure responses the
/// engine produces on its own.
pub mod codes {
    /// No handler is registered for a catalogued command.
    pub const NOT_IMPLEMENTED: i64 = 1001;
    /// The command is not in the catalogue and has no handler.
    pub const UNRECOGNIZED_COMMAND: i64 = 1002;
    /// The request payload could not be interpreted.
    pub const INVALID_REQUEST: i64 = 1003;
    /// The request is illegal in the current session state.
    pub const SEQUENCE_VIOLATION: i64 = 1004;
    /// A second `initialize` request.
    pub const ALREADY_INITIALIZED: i64 = 1005;
    /// The handler failed without producing a response.
    pub const HANDLER_FAILED: i64 = 1006;
}

/// Errors from the session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport failed; the session is over.
    #[error("transport error: {0}")]
    Frame(#[from] FrameError),

    /// A payload could not be interpreted.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// A message is illegal in the current lifecycle state.
    #[error("protocol sequence violation in state {state:?}: {detail}")]
    ProtocolSequence {
        /// State at the time of the violation.
        state: SessionState,
        /// What was attempted.
        detail: String,
    },

    /// `initialize` was seen a second time.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// A sequence number was registered twice.
    #[error("sequence number {0} is already pending")]
    DuplicateSeq(i64),

    /// A response referenced a request that is not pending.
    #[error("no pending request with seq {0}")]
    UnknownRequestSeq(i64),

    /// The outbound sequence counter ran out.
    #[error("sequence numbers exhausted")]
    SeqExhausted,

    /// A response arrived after its waiter gave up.
    #[error("late response for `{command}` (request_seq {request_seq}) dropped")]
    LateResponse {
        /// The command of the abandoned request.
        command: String,
        /// Its sequence number.
        request_seq: i64,
    },

    /// No response arrived in time.
    #[error("request timed out: {command} (seq {seq})")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// Its sequence number.
        seq: i64,
    },

    /// The peer answered with `success: false`.
    #[error("peer rejected `{command}`: {message}")]
    Rejected {
        /// The rejected command.
        command: String,
        /// The short failure message.
        message: String,
        /// Structured error from the response body, if any.
        error: Option<ErrorMessage>,
    },

    /// The peer did not advertise support for the command.
    #[error("peer does not support `{command}`")]
    NotSupported {
        /// The unsupported command.
        command: String,
    },

    /// The outbound channel or the transport is closed.
    #[error("session channel closed")]
    ChannelClosed,
}

impl SessionError {
    /// Error id used when this error is turned into a failure response.
    pub fn code(&self) -> i64 {
        match self {
            SessionError::ProtocolSequence { .. } => codes::SEQUENCE_VIOLATION,
            SessionError::AlreadyInitialized => codes::ALREADY_INITIALIZED,
            SessionError::Message(_) => codes::INVALID_REQUEST,
            _ => codes::HANDLER_FAILED,
        }
    }

    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Frame(_) | SessionError::DuplicateSeq(_) | SessionError::SeqExhausted
        )
    }
}
