//! dapline-proto — wire layer of the Debug Adapter Protocol.
//!
//! Content-Length framing, the request/response/event envelope, the
//! catalogue of known commands and events with their typed payloads, and
//! the resolved capability view.

pub mod capabilities;
pub mod catalog;
pub mod error;
pub mod frame;
pub mod message;
pub mod types;

// Re-export key types for convenience.
pub use capabilities::AdapterCapabilities;
pub use catalog::{Command, EventBody, EventKind, RequestArguments};
pub use error::{FrameError, MessageError};
pub use frame::{
    decode_frame, encode_frame, write_frame, FrameReader, DEFAULT_MAX_FRAME_BYTES,
    MAX_HEADER_LINE_BYTES,
};
pub use message::{peek_request, ErrorMessage, Event, ProtocolMessage, Request, Response};
pub use types::*;
