//! Session lifecycle state machine.
//!
//! Every message the engine sends or receives is observed here before it
//! takes effect. The machine decides whether the message is legal in the
//! current state and which state follows.

use std::collections::VecDeque;
use std::fmt;

use dapline_proto::{Command, Event, EventKind, ProtocolMessage};
use tokio::sync::watch;

use crate::error::SessionError;

/// The current state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No `initialize` request yet.
    Uninitialized,
    /// `initialize` sent or received, response pending.
    Initializing,
    /// Handshake done; breakpoints and options may be configured.
    Configuring,
    /// `configurationDone` acknowledged; arbitrary traffic.
    Running,
    /// Shutdown requested or the debuggee ended.
    Terminating,
    /// Absorbing final state.
    Terminated,
}

/// Which side of the protocol this engine speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Development tool side: sends `initialize`.
    #[default]
    Client,
    /// Debug adapter side: receives `initialize`.
    Adapter,
}

/// How illegal transitions are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Illegal messages fail with [`SessionError::ProtocolSequence`].
    #[default]
    Strict,
    /// Illegal events are held back until the state allows them; other
    /// illegal messages are dropped with a warning instead of a report.
    Lenient,
}

/// Direction of a message relative to this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer.
    Inbound,
    /// Sent to the peer.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Events held back under [`SequencePolicy::Lenient`] before further
/// illegal events are refused.
pub const MAX_HELD_EVENTS: usize = 64;

/// The lifecycle state machine of one session.
#[derive(Debug)]
pub struct Lifecycle {
    role: Role,
    policy: SequencePolicy,
    state: SessionState,
    notify: watch::Sender<SessionState>,
    held: VecDeque<(Direction, Event)>,
}

impl Lifecycle {
    /// Create a machine in [`SessionState::Uninitialized`].
    pub fn new(role: Role, policy: SequencePolicy) -> Self {
        let (notify, _) = watch::channel(SessionState::Uninitialized);
        Self {
            role,
            policy,
            state: SessionState::Uninitialized,
            notify,
            held: VecDeque::new(),
        }
    }

    /// Return the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Return the role this machine enforces.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Return the active sequence policy.
    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.notify.subscribe()
    }

    /// Observe a message travelling in `direction`.
    ///
    /// Responses are judged by their own `command`; use
    /// [`observe_response`](Self::observe_response) when the command comes
    /// from the correlation table instead.
    pub fn observe(
        &mut self,
        direction: Direction,
        message: &ProtocolMessage,
    ) -> Result<(), SessionError> {
        match message {
            ProtocolMessage::Request(request) => self.observe_request(direction, &request.command),
            ProtocolMessage::Response(response) => {
                self.observe_response(direction, &response.command, response.success);
                Ok(())
            }
            ProtocolMessage::Event(event) => self.observe_event(direction, &event.event),
        }
    }

    /// Observe a request for `command` travelling in `direction`.
    pub fn observe_request(
        &mut self,
        direction: Direction,
        command: &str,
    ) -> Result<(), SessionError> {
        let verdict = self.on_request(direction, command);
        self.settle(verdict)
    }

    /// Observe an event named `event` travelling in `direction`.
    pub fn observe_event(&mut self, direction: Direction, event: &str) -> Result<(), SessionError> {
        let verdict = self.on_event(direction, event);
        self.settle(verdict)
    }

    /// Observe a response to a request whose command is `command`.
    ///
    /// Responses are never illegal: correlation decides whether they are
    /// valid. They only drive transitions.
    pub fn observe_response(&mut self, direction: Direction, command: &str, success: bool) {
        if let Some(next) = self.on_response(direction, command, success) {
            self.transition(next);
        }
    }

    /// Admit an event travelling in `direction`.
    ///
    /// Returns the event when it may be delivered now. Under
    /// [`SequencePolicy::Lenient`] an illegal event, or any event queued
    /// behind one, is held and `Ok(None)` is returned; see
    /// [`release`](Self::release).
    pub fn admit_event(
        &mut self,
        direction: Direction,
        event: Event,
    ) -> Result<Option<Event>, SessionError> {
        let verdict = if self.held.is_empty() {
            self.on_event(direction, &event.event)
        } else {
            Err(self.violation(format!(
                "{direction} event `{}` queued behind held events",
                event.event
            )))
        };
        match verdict {
            Ok(next) => {
                if let Some(next) = next {
                    self.transition(next);
                }
                Ok(Some(event))
            }
            Err(err) if self.policy == SequencePolicy::Lenient => {
                if self.held.len() >= MAX_HELD_EVENTS {
                    return Err(err);
                }
                tracing::warn!("holding {} event `{}`: {}", direction, event.event, err);
                self.held.push_back((direction, event));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Take the held events that have become legal, oldest first.
    ///
    /// Stops at the first event that is still illegal so that delivery
    /// order is preserved.
    pub fn release(&mut self) -> Vec<(Direction, Event)> {
        let mut released = Vec::new();
        loop {
            let verdict = match self.held.front() {
                Some((direction, event)) => self.on_event(*direction, &event.event),
                None => break,
            };
            let Ok(next) = verdict else {
                break;
            };
            if let Some(next) = next {
                self.transition(next);
            }
            if let Some(item) = self.held.pop_front() {
                released.push(item);
            }
        }
        released
    }

    /// Whether any event is held.
    pub fn has_held(&self) -> bool {
        !self.held.is_empty()
    }

    /// Force [`SessionState::Terminated`] (transport closed, shutdown timed
    /// out, or the session was closed locally). Held events are dropped.
    pub fn terminate(&mut self) {
        if !self.held.is_empty() {
            tracing::warn!("dropping {} held events", self.held.len());
            self.held.clear();
        }
        self.transition(SessionState::Terminated);
    }

    fn settle(
        &mut self,
        verdict: Result<Option<SessionState>, SessionError>,
    ) -> Result<(), SessionError> {
        match verdict {
            Ok(Some(next)) => {
                self.transition(next);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!("session state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.notify.send_replace(next);
    }

    fn initialize_direction(&self) -> Direction {
        match self.role {
            Role::Client => Direction::Outbound,
            Role::Adapter => Direction::Inbound,
        }
    }

    fn violation(&self, detail: String) -> SessionError {
        SessionError::ProtocolSequence {
            state: self.state,
            detail,
        }
    }

    fn on_request(
        &self,
        direction: Direction,
        command: &str,
    ) -> Result<Option<SessionState>, SessionError> {
        use SessionState::*;

        if command == Command::Initialize.as_str() {
            if self.state != Uninitialized {
                return Err(SessionError::AlreadyInitialized);
            }
            if direction != self.initialize_direction() {
                return Err(self.violation(format!(
                    "{direction} initialize request for a {:?} session",
                    self.role
                )));
            }
            return Ok(Some(Initializing));
        }

        let ends_session = Command::from_name(command).is_some_and(Command::ends_session);
        match self.state {
            Uninitialized => Err(self.violation(format!(
                "{direction} request `{command}` before initialize"
            ))),
            Initializing if ends_session => Ok(Some(Terminating)),
            Initializing => Err(self.violation(format!(
                "{direction} request `{command}` before the initialize response"
            ))),
            Configuring | Running if ends_session => Ok(Some(Terminating)),
            Configuring | Running | Terminating => Ok(None),
            Terminated if command == Command::Disconnect.as_str() => Ok(None),
            Terminated => Err(self.violation(format!(
                "{direction} request `{command}` after termination"
            ))),
        }
    }

    fn on_response(
        &self,
        direction: Direction,
        command: &str,
        success: bool,
    ) -> Option<SessionState> {
        use SessionState::*;

        match Command::from_name(command)? {
            Command::Initialize
                if self.state == Initializing && direction != self.initialize_direction() =>
            {
                Some(if success { Configuring } else { Terminated })
            }
            Command::ConfigurationDone if self.state == Configuring && success => Some(Running),
            Command::Disconnect | Command::Terminate if self.state != Uninitialized => {
                Some(Terminated)
            }
            _ => None,
        }
    }

    fn on_event(
        &self,
        direction: Direction,
        event: &str,
    ) -> Result<Option<SessionState>, SessionError> {
        use SessionState::*;

        match (EventKind::from_name(event), self.state) {
            (Some(EventKind::Initialized), Configuring) => Ok(None),
            (Some(EventKind::Initialized), Initializing) => Err(self.violation(format!(
                "{direction} initialized event before the initialize response"
            ))),
            (Some(kind), Configuring | Running) if kind.ends_session() => Ok(Some(Terminating)),
            (Some(kind), Terminating | Terminated) if kind.ends_session() => Ok(None),
            (Some(EventKind::Initialized), _) => Err(self.violation(format!(
                "{direction} initialized event outside configuration"
            ))),
            (_, Configuring | Running | Terminating) => Ok(None),
            _ => Err(self.violation(format!("{direction} event `{event}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dapline_proto::{Event, Request, Response};

    fn request(command: &str) -> ProtocolMessage {
        Request::new(command, None).into()
    }

    fn response(command: &str, success: bool) -> ProtocolMessage {
        if success {
            Response::success(&Request::new(command, None), None).into()
        } else {
            Response::failure(1, command, "failed", None).into()
        }
    }

    fn event(name: &str) -> ProtocolMessage {
        Event::new(name, None).into()
    }

    fn running_client() -> Lifecycle {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        lc.observe(Direction::Inbound, &response("initialize", true)).unwrap();
        lc.observe(Direction::Inbound, &event("initialized")).unwrap();
        lc.observe(Direction::Outbound, &request("configurationDone")).unwrap();
        lc.observe(Direction::Inbound, &response("configurationDone", true)).unwrap();
        lc
    }

    #[test]
    fn lifecycle_starts_uninitialized() {
        let lc = Lifecycle::new(Role::Client, SequencePolicy::default());
        assert_eq!(lc.state(), SessionState::Uninitialized);
        assert_eq!(lc.policy(), SequencePolicy::Strict);
        assert_eq!(lc.role(), Role::Client);
    }

    #[test]
    fn lifecycle_client_handshake() {
        let lc = running_client();
        assert_eq!(lc.state(), SessionState::Running);
    }

    #[test]
    fn lifecycle_adapter_handshake() {
        let mut lc = Lifecycle::new(Role::Adapter, SequencePolicy::Strict);
        lc.observe(Direction::Inbound, &request("initialize")).unwrap();
        assert_eq!(lc.state(), SessionState::Initializing);
        lc.observe(Direction::Outbound, &response("initialize", true)).unwrap();
        assert_eq!(lc.state(), SessionState::Configuring);
        lc.observe(Direction::Outbound, &event("initialized")).unwrap();
        lc.observe(Direction::Inbound, &request("setBreakpoints")).unwrap();
        lc.observe(Direction::Inbound, &request("configurationDone")).unwrap();
        lc.observe(Direction::Outbound, &response("configurationDone", true))
            .unwrap();
        assert_eq!(lc.state(), SessionState::Running);
    }

    #[test]
    fn lifecycle_request_before_initialize_is_strict_error() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        let err = lc.observe(Direction::Outbound, &request("threads")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolSequence {
                state: SessionState::Uninitialized,
                ..
            }
        ));
        assert_eq!(lc.state(), SessionState::Uninitialized);
    }

    #[test]
    fn lifecycle_lenient_still_refuses_requests() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Lenient);
        let err = lc.observe(Direction::Outbound, &request("threads")).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSequence { .. }));
        assert_eq!(lc.state(), SessionState::Uninitialized);
        assert_eq!(lc.policy(), SequencePolicy::Lenient);
    }

    #[test]
    fn lifecycle_lenient_holds_initialized_until_response() {
        let mut lc = Lifecycle::new(Role::Adapter, SequencePolicy::Lenient);
        lc.observe(Direction::Inbound, &request("initialize")).unwrap();

        let held = lc
            .admit_event(Direction::Outbound, Event::new("initialized", None))
            .unwrap();
        assert!(held.is_none());
        assert!(lc.has_held());
        assert!(lc.release().is_empty());

        lc.observe(Direction::Outbound, &response("initialize", true)).unwrap();
        let released = lc.release();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, Direction::Outbound);
        assert_eq!(released[0].1.event, "initialized");
        assert!(!lc.has_held());
        assert_eq!(lc.state(), SessionState::Configuring);
    }

    #[test]
    fn lifecycle_lenient_keeps_event_order() {
        let mut lc = Lifecycle::new(Role::Adapter, SequencePolicy::Lenient);
        lc.observe(Direction::Inbound, &request("initialize")).unwrap();
        lc.admit_event(Direction::Outbound, Event::new("initialized", None))
            .unwrap();
        lc.observe(Direction::Outbound, &response("initialize", true)).unwrap();

        // Legal on its own, but queued behind the held event.
        let queued = lc
            .admit_event(Direction::Outbound, Event::new("output", None))
            .unwrap();
        assert!(queued.is_none());
        let names: Vec<_> = lc.release().into_iter().map(|(_, e)| e.event).collect();
        assert_eq!(names, ["initialized", "output"]);
    }

    #[test]
    fn lifecycle_strict_never_holds() {
        let mut lc = Lifecycle::new(Role::Adapter, SequencePolicy::Strict);
        lc.observe(Direction::Inbound, &request("initialize")).unwrap();
        let err = lc
            .admit_event(Direction::Outbound, Event::new("initialized", None))
            .unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSequence { .. }));
        assert!(!lc.has_held());
    }

    #[test]
    fn lifecycle_held_events_are_bounded() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Lenient);
        for _ in 0..MAX_HELD_EVENTS {
            assert!(lc
                .admit_event(Direction::Inbound, Event::new("output", None))
                .unwrap()
                .is_none());
        }
        assert!(lc
            .admit_event(Direction::Inbound, Event::new("output", None))
            .is_err());
    }

    #[test]
    fn lifecycle_terminate_drops_held_events() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Lenient);
        lc.admit_event(Direction::Inbound, Event::new("stopped", None))
            .unwrap();
        lc.terminate();
        assert!(!lc.has_held());
        assert!(lc.release().is_empty());
    }

    #[test]
    fn lifecycle_second_initialize_rejected_under_any_policy() {
        for policy in [SequencePolicy::Strict, SequencePolicy::Lenient] {
            let mut lc = Lifecycle::new(Role::Client, policy);
            lc.observe(Direction::Outbound, &request("initialize")).unwrap();
            let err = lc
                .observe(Direction::Outbound, &request("initialize"))
                .unwrap_err();
            assert!(matches!(err, SessionError::AlreadyInitialized));
        }
    }

    #[test]
    fn lifecycle_initialize_in_wrong_direction() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        assert!(lc.observe(Direction::Inbound, &request("initialize")).is_err());
        let mut lc = Lifecycle::new(Role::Adapter, SequencePolicy::Strict);
        assert!(lc.observe(Direction::Outbound, &request("initialize")).is_err());
    }

    #[test]
    fn lifecycle_failed_initialize_terminates() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        lc.observe(Direction::Inbound, &response("initialize", false)).unwrap();
        assert_eq!(lc.state(), SessionState::Terminated);
    }

    #[test]
    fn lifecycle_initialized_event_before_response_is_error() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        assert!(lc.observe(Direction::Inbound, &event("initialized")).is_err());
        assert_eq!(lc.state(), SessionState::Initializing);
    }

    #[test]
    fn lifecycle_requests_during_initializing_rejected() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        assert!(lc.observe(Direction::Outbound, &request("launch")).is_err());
        lc.observe(Direction::Outbound, &request("disconnect")).unwrap();
        assert_eq!(lc.state(), SessionState::Terminating);
    }

    #[test]
    fn lifecycle_failed_configuration_done_stays_configuring() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        lc.observe(Direction::Inbound, &response("initialize", true)).unwrap();
        lc.observe(Direction::Outbound, &request("configurationDone")).unwrap();
        lc.observe(Direction::Inbound, &response("configurationDone", false))
            .unwrap();
        assert_eq!(lc.state(), SessionState::Configuring);
    }

    #[test]
    fn lifecycle_events_before_configuration_rejected() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        assert!(lc.observe(Direction::Inbound, &event("output")).is_err());
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        assert!(lc.observe(Direction::Inbound, &event("stopped")).is_err());
    }

    #[test]
    fn lifecycle_terminated_event_starts_shutdown() {
        let mut lc = running_client();
        lc.observe(Direction::Inbound, &event("stopped")).unwrap();
        lc.observe(Direction::Inbound, &event("terminated")).unwrap();
        assert_eq!(lc.state(), SessionState::Terminating);
        lc.observe(Direction::Inbound, &event("exited")).unwrap();
        lc.observe(Direction::Outbound, &request("disconnect")).unwrap();
        lc.observe(Direction::Inbound, &response("disconnect", true)).unwrap();
        assert_eq!(lc.state(), SessionState::Terminated);
    }

    #[test]
    fn lifecycle_terminate_then_disconnect() {
        let mut lc = running_client();
        lc.observe(Direction::Outbound, &request("terminate")).unwrap();
        assert_eq!(lc.state(), SessionState::Terminating);
        lc.observe(Direction::Inbound, &response("terminate", true)).unwrap();
        assert_eq!(lc.state(), SessionState::Terminated);
        lc.observe(Direction::Outbound, &request("disconnect")).unwrap();
        assert!(lc.observe(Direction::Outbound, &request("threads")).is_err());
        assert!(lc.observe(Direction::Inbound, &event("output")).is_err());
    }

    #[test]
    fn lifecycle_observe_response_uses_given_command() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        lc.observe_response(Direction::Inbound, "initialize", true);
        assert_eq!(lc.state(), SessionState::Configuring);
    }

    #[test]
    fn lifecycle_publishes_transitions() {
        let mut lc = Lifecycle::new(Role::Client, SequencePolicy::Strict);
        let rx = lc.subscribe();
        lc.observe(Direction::Outbound, &request("initialize")).unwrap();
        assert_eq!(*rx.borrow(), SessionState::Initializing);
        lc.terminate();
        assert_eq!(*rx.borrow(), SessionState::Terminated);
    }
}
