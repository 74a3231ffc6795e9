//! dapline-session — Debug Adapter Protocol session engine.
//!
//! Drives one DAP connection: lifecycle enforcement, request/response
//! correlation, dispatch of inbound requests to handlers, and event
//! fan-out. Works for either side of the protocol.

pub mod coordinates;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod handles;
pub mod lifecycle;
pub mod output;
pub mod router;

// Re-export key types for convenience.
pub use coordinates::Coordinates;
pub use correlation::{CorrelationTable, PendingRequestEntry, SeqCounter};
pub use engine::{PendingReply, Session, SessionConfig, REPORT_QUEUE};
pub use error::{codes, SessionError};
pub use handles::{Handles, START_HANDLE};
pub use lifecycle::{Direction, Lifecycle, Role, SequencePolicy, SessionState, MAX_HELD_EVENTS};
pub use output::{OutputLevel, OutputLog, MAX_PENDING_OUTPUT};
pub use router::{CancellationFlag, HandlerError, HandlerResult, RequestContext, Router};
