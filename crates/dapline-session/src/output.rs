//! Log sink that forwards messages to the client as `output` events.
//!
//! Messages below the sink's minimum level are dropped. Messages logged
//! before the handshake has finished are held and flushed with the first
//! message that can go out.

use std::collections::VecDeque;

use dapline_proto::{MessageError, OutputEventBody};
use tokio::sync::Mutex;

use crate::engine::Session;
use crate::error::SessionError;
use crate::lifecycle::SessionState;

/// Messages held while the session cannot carry events yet.
pub const MAX_PENDING_OUTPUT: usize = 64;

/// Severity of a logged message, ordered from chattiest to quietest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputLevel {
    /// Detailed tracing of adapter internals.
    Verbose,
    /// Regular progress messages.
    #[default]
    Log,
    /// Something unexpected that did not stop the session.
    Warn,
    /// A failure.
    Error,
    /// Used as a minimum level only: nothing is forwarded.
    Stop,
}

impl OutputLevel {
    /// The `output` event category for this level.
    pub fn category(self) -> &'static str {
        match self {
            OutputLevel::Error => "stderr",
            _ => "console",
        }
    }
}

/// Forwards log messages to the peer over [`Session::publish_event`].
pub struct OutputLog {
    session: Session,
    min_level: OutputLevel,
    pending: Mutex<VecDeque<OutputEventBody>>,
}

impl OutputLog {
    /// A sink forwarding `min_level` and above.
    pub fn new(session: Session, min_level: OutputLevel) -> Self {
        Self {
            session,
            min_level,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn min_level(&self) -> OutputLevel {
        self.min_level
    }

    /// Whether a message at `level` would be forwarded.
    pub fn enabled(&self, level: OutputLevel) -> bool {
        self.min_level != OutputLevel::Stop && level != OutputLevel::Stop && level >= self.min_level
    }

    /// Log `message` at `level`.
    ///
    /// The message is also written to the local trace log. A trailing
    /// newline is added when missing, as clients print output verbatim.
    pub async fn log(&self, level: OutputLevel, message: &str) -> Result<(), SessionError> {
        match level {
            OutputLevel::Verbose => tracing::debug!(target: "dapline::output", "{}", message),
            OutputLevel::Log => tracing::info!(target: "dapline::output", "{}", message),
            OutputLevel::Warn => tracing::warn!(target: "dapline::output", "{}", message),
            OutputLevel::Error | OutputLevel::Stop => {
                tracing::error!(target: "dapline::output", "{}", message)
            }
        }
        if !self.enabled(level) {
            return Ok(());
        }

        let mut output = message.to_string();
        if !output.ends_with('\n') {
            output.push('\n');
        }
        let body = OutputEventBody {
            category: Some(level.category().to_string()),
            output,
            source: None,
            line: None,
            column: None,
        };

        let mut pending = self.pending.lock().await;
        match self.session.state() {
            SessionState::Uninitialized | SessionState::Initializing => {
                if pending.len() >= MAX_PENDING_OUTPUT {
                    tracing::warn!("output backlog full, dropping oldest message");
                    pending.pop_front();
                }
                pending.push_back(body);
                Ok(())
            }
            SessionState::Terminated => {
                tracing::debug!("session terminated, output not forwarded");
                Ok(())
            }
            _ => {
                pending.push_back(body);
                self.drain(&mut pending).await
            }
        }
    }

    pub async fn verbose(&self, message: &str) -> Result<(), SessionError> {
        self.log(OutputLevel::Verbose, message).await
    }

    pub async fn info(&self, message: &str) -> Result<(), SessionError> {
        self.log(OutputLevel::Log, message).await
    }

    pub async fn warn(&self, message: &str) -> Result<(), SessionError> {
        self.log(OutputLevel::Warn, message).await
    }

    pub async fn error(&self, message: &str) -> Result<(), SessionError> {
        self.log(OutputLevel::Error, message).await
    }

    /// Send held messages if the session can carry events now.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let mut pending = self.pending.lock().await;
        match self.session.state() {
            SessionState::Configuring | SessionState::Running | SessionState::Terminating => {
                self.drain(&mut pending).await
            }
            _ => Ok(()),
        }
    }

    /// Number of messages waiting for the handshake.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn drain(&self, pending: &mut VecDeque<OutputEventBody>) -> Result<(), SessionError> {
        while let Some(body) = pending.pop_front() {
            let value = serde_json::to_value(&body).map_err(MessageError::from)?;
            self.session.publish_event("output", Some(value)).await?;
        }
        Ok(())
    }
}
