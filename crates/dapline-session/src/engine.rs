//! The session engine.
//!
//! One reader task drains inbound frames; one writer task owns the write
//! half. Everything else funnels outbound messages through a single
//! mutex that also owns the sequence counter, so wire order is `seq`
//! order. Locks are always taken outbound, then lifecycle, then pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dapline_proto::{
    peek_request, write_frame, AdapterCapabilities, CancelArguments, Capabilities, Command,
    ErrorMessage, Event, EventBody, EventKind, FrameReader, ProtocolMessage, Request, RequestArguments,
    Response, DEFAULT_MAX_FRAME_BYTES,
};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::coordinates::Coordinates;
use crate::correlation::{CorrelationTable, SeqCounter};
use crate::error::{codes, SessionError};
use crate::lifecycle::{Direction, Lifecycle, Role, SequencePolicy, SessionState};
use crate::router::{CancellationFlag, RequestContext, Router};

/// Default wait for a response to a self-issued request (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default wait for the acknowledgement of `disconnect`/`terminate` (seconds).
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Default capacity of the outbound frame queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Reports kept for [`Session::take_reports`]; further reports are logged
/// and dropped.
pub const REPORT_QUEUE: usize = 256;

type Queued = (i64, Option<oneshot::Receiver<Response>>);

/// Engine settings for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Which side of the protocol to speak.
    pub role: Role,
    /// How lifecycle violations are handled.
    pub policy: SequencePolicy,
    /// Largest inbound frame accepted.
    pub max_frame_bytes: usize,
    /// Deadline used by [`Session::request`].
    pub request_timeout: Duration,
    /// Deadline used by [`Session::shutdown`] and [`Session::close`].
    pub shutdown_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
    /// As an adapter, emit `initialized` right after a successful
    /// `initialize` response.
    pub auto_initialized: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            policy: SequencePolicy::Strict,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            outbound_queue: OUTBOUND_QUEUE,
            auto_initialized: false,
        }
    }
}

impl SessionConfig {
    /// Defaults for the client side.
    pub fn client() -> Self {
        Self::default()
    }

    /// Defaults for the adapter side.
    pub fn adapter() -> Self {
        Self {
            role: Role::Adapter,
            ..Self::default()
        }
    }
}

/// A request on the wire whose response has not been consumed yet.
#[derive(Debug)]
pub struct PendingReply {
    seq: i64,
    command: String,
    rx: oneshot::Receiver<Response>,
}

impl PendingReply {
    /// Sequence number the request went out with.
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Command of the request.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the response, giving up after `timeout`.
    ///
    /// Giving up does not forget the request: a late response is still
    /// correlated and then dropped with a warning.
    pub async fn wait(self, timeout: Duration) -> Result<Response, SessionError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SessionError::ChannelClosed),
            Err(_) => Err(SessionError::Timeout {
                command: self.command,
                seq: self.seq,
            }),
        }
    }

    /// Wait for the response without a deadline.
    pub async fn response(self) -> Result<Response, SessionError> {
        self.rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

struct Outbound {
    seq: SeqCounter,
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

struct Shared {
    config: SessionConfig,
    router: Router,
    outbound: Mutex<Outbound>,
    lifecycle: Mutex<Lifecycle>,
    pending: Mutex<CorrelationTable>,
    in_flight: Mutex<HashMap<i64, CancellationFlag>>,
    capabilities: Mutex<AdapterCapabilities>,
    coordinates: Mutex<Coordinates>,
    state: watch::Receiver<SessionState>,
    reports: mpsc::Sender<SessionError>,
}

struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// One DAP session over one duplex byte stream.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Tasks>>,
    reports: Arc<Mutex<Option<mpsc::Receiver<SessionError>>>>,
}

impl Session {
    /// Start the reader and writer tasks over `reader`/`writer`.
    ///
    /// The router is frozen from here on. Must be called inside a Tokio
    /// runtime.
    pub fn spawn<R, W>(reader: R, writer: W, router: Router, config: SessionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(config.outbound_queue.max(1));
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_QUEUE);
        let lifecycle = Lifecycle::new(config.role, config.policy);
        let state = lifecycle.subscribe();
        let frames = FrameReader::with_max_frame_bytes(reader, config.max_frame_bytes);

        tracing::debug!(
            "starting {:?} session ({:?} sequencing)",
            config.role,
            config.policy
        );

        let shared = Arc::new(Shared {
            config,
            router,
            outbound: Mutex::new(Outbound {
                seq: SeqCounter::new(),
                tx: Some(frame_tx),
            }),
            lifecycle: Mutex::new(lifecycle),
            pending: Mutex::new(CorrelationTable::new()),
            in_flight: Mutex::new(HashMap::new()),
            capabilities: Mutex::new(AdapterCapabilities::default()),
            coordinates: Mutex::new(Coordinates::default()),
            state,
            reports: reports_tx,
        });

        let writer = tokio::spawn(write_loop(Arc::clone(&shared), writer, frame_rx));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), frames));

        Self {
            shared,
            tasks: Arc::new(Mutex::new(Tasks {
                reader: Some(reader),
                writer: Some(writer),
            })),
            reports: Arc::new(Mutex::new(Some(reports_rx))),
        }
    }

    /// The engine settings.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Which side of the protocol this session speaks.
    pub fn role(&self) -> Role {
        self.shared.config.role
    }

    /// The active sequence policy.
    pub fn policy(&self) -> SequencePolicy {
        self.shared.config.policy
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.clone()
    }

    /// Wait until the session reaches `target`.
    ///
    /// Fails if the session terminates first.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), SessionError> {
        let mut rx = self.shared.state.clone();
        let reached = *rx
            .wait_for(|state| *state == target || *state == SessionState::Terminated)
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        if reached == target {
            Ok(())
        } else {
            Err(SessionError::ProtocolSequence {
                state: reached,
                detail: format!("session ended before reaching {target:?}"),
            })
        }
    }

    /// Capabilities of the adapter, as announced so far.
    pub async fn capabilities(&self) -> AdapterCapabilities {
        self.shared.capabilities.lock().await.clone()
    }

    /// Line/column bases negotiated in `initialize`.
    pub async fn coordinates(&self) -> Coordinates {
        *self.shared.coordinates.lock().await
    }

    /// Number of self-issued requests still awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Send a request and return the handle for its response.
    pub async fn send_request(
        &self,
        command: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<PendingReply, SessionError> {
        let command = command.into();
        let mut outbound = self.shared.outbound.lock().await;
        let (seq, rx) = self
            .shared
            .enqueue(&mut outbound, Request::new(command.clone(), arguments).into(), true)
            .await?;
        let rx = rx.ok_or(SessionError::ChannelClosed)?;
        Ok(PendingReply { seq, command, rx })
    }

    /// Send a request and wait for a successful response within the
    /// configured request timeout.
    pub async fn request(
        &self,
        command: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<Response, SessionError> {
        let reply = self.send_request(command, arguments).await?;
        let response = reply.wait(self.shared.config.request_timeout).await?;
        if response.success {
            Ok(response)
        } else {
            Err(SessionError::Rejected {
                error: response.error_message(),
                command: response.command,
                message: response.message.unwrap_or_default(),
            })
        }
    }

    /// Ask the peer to cancel the pending request `request_seq`.
    ///
    /// The request stays pending until its own response arrives; the
    /// returned handle is for the `cancel` request itself.
    pub async fn cancel(&self, request_seq: i64) -> Result<PendingReply, SessionError> {
        if self.role() == Role::Client && !self.capabilities().await.supports_cancel_request {
            return Err(SessionError::NotSupported {
                command: Command::Cancel.as_str().to_string(),
            });
        }
        self.shared.pending.lock().await.cancel_pending(request_seq)?;
        self.send_request(
            Command::Cancel.as_str(),
            Some(json!({ "requestId": request_seq })),
        )
        .await
    }

    /// Send an event to the peer.
    pub async fn publish_event(
        &self,
        event: impl Into<String>,
        body: Option<Value>,
    ) -> Result<(), SessionError> {
        let mut outbound = self.shared.outbound.lock().await;
        self.shared
            .enqueue_event(&mut outbound, Event::new(event, body))
            .await
    }

    /// Subscribe to inbound events named `event`.
    pub async fn subscribe(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Event> {
        self.shared.router.subscribe(event).await
    }

    /// Subscribe to every inbound event.
    pub async fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Event> {
        self.shared.router.subscribe_all().await
    }

    /// Take the channel of recoverable problems. Only the first caller
    /// gets it; up to [`REPORT_QUEUE`] reports accumulate until then.
    pub async fn take_reports(&self) -> Option<mpsc::Receiver<SessionError>> {
        self.reports.lock().await.take()
    }

    /// Send `command` (normally `disconnect` or `terminate`) and wait for
    /// its acknowledgement within the shutdown timeout. On timeout the
    /// session is forced to [`SessionState::Terminated`].
    pub async fn shutdown(
        &self,
        command: Command,
        arguments: Option<Value>,
    ) -> Result<(), SessionError> {
        let reply = self.send_request(command.as_str(), arguments).await?;
        match reply.wait(self.shared.config.shutdown_timeout).await {
            Ok(response) if !response.success => {
                tracing::warn!(
                    "peer rejected `{}`: {}",
                    command,
                    response.message.unwrap_or_default()
                );
            }
            Ok(_) => {}
            Err(SessionError::Timeout { .. }) => {
                tracing::warn!(
                    "`{}` not acknowledged within {:?}; forcing termination",
                    command,
                    self.shared.config.shutdown_timeout
                );
                self.shared.lifecycle.lock().await.terminate();
            }
            Err(SessionError::ChannelClosed) => {
                tracing::debug!("transport closed during `{}`", command);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Stop both tasks. Frames already queued are flushed first, within
    /// the shutdown timeout.
    pub async fn close(&self) {
        let mut tasks = self.tasks.lock().await;
        self.shared.outbound.lock().await.tx = None;

        if let Some(reader) = tasks.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        if let Some(mut writer) = tasks.writer.take() {
            let deadline = self.shared.config.shutdown_timeout;
            if tokio::time::timeout(deadline, &mut writer).await.is_err() {
                tracing::warn!("writer did not drain within {:?}", deadline);
                writer.abort();
            }
        }
        self.shared.transport_closed().await;
    }
}

impl Shared {
    fn report(&self, err: SessionError) {
        match self.reports.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                tracing::warn!("report queue full, dropping: {}", err);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Report a lifecycle violation. Under the lenient policy it is only
    /// logged.
    fn report_violation(&self, err: SessionError) {
        match self.config.policy {
            SequencePolicy::Strict => self.report(err),
            SequencePolicy::Lenient => tracing::debug!("not reported: {}", err),
        }
    }

    /// Check and queue one outbound request or response, then send any
    /// held events it made legal. The caller holds the outbound lock.
    async fn enqueue(
        &self,
        outbound: &mut Outbound,
        message: ProtocolMessage,
        checked: bool,
    ) -> Result<Queued, SessionError> {
        if outbound.tx.is_none() {
            return Err(SessionError::ChannelClosed);
        }
        if checked {
            self.lifecycle
                .lock()
                .await
                .observe(Direction::Outbound, &message)?;
        }
        let queued = self.transmit(outbound, message).await?;
        self.release_held(outbound).await;
        Ok(queued)
    }

    /// Queue an outbound event, or hold it under the lenient policy until
    /// the lifecycle allows it. The caller holds the outbound lock.
    async fn enqueue_event(&self, outbound: &mut Outbound, event: Event) -> Result<(), SessionError> {
        if outbound.tx.is_none() {
            return Err(SessionError::ChannelClosed);
        }
        let admitted = self
            .lifecycle
            .lock()
            .await
            .admit_event(Direction::Outbound, event)?;
        if let Some(event) = admitted {
            self.transmit(outbound, event.into()).await?;
            self.release_held(outbound).await;
        }
        Ok(())
    }

    /// Stamp, register and queue a message that already passed the
    /// lifecycle.
    async fn transmit(
        &self,
        outbound: &mut Outbound,
        mut message: ProtocolMessage,
    ) -> Result<Queued, SessionError> {
        if outbound.tx.is_none() {
            return Err(SessionError::ChannelClosed);
        }
        let seq = match outbound.seq.next_seq() {
            Ok(seq) => seq,
            Err(err) => return Err(self.abort(outbound, err).await),
        };
        message.set_seq(seq);
        let bytes = message.to_bytes()?;

        let reply = match &message {
            ProtocolMessage::Request(request) => {
                let registered = self
                    .pending
                    .lock()
                    .await
                    .register(seq, request.command.clone());
                match registered {
                    Ok(rx) => Some(rx),
                    Err(err) => return Err(self.abort(outbound, err).await),
                }
            }
            _ => None,
        };
        self.note(&message).await;

        tracing::debug!("-> {} `{}` seq={}", kind(&message), message.name(), seq);
        let sent = match &outbound.tx {
            Some(tx) => tx.send(bytes).await.is_ok(),
            None => false,
        };
        if !sent {
            if reply.is_some() {
                self.pending.lock().await.forget(seq);
            }
            return Err(SessionError::ChannelClosed);
        }
        Ok((seq, reply))
    }

    /// Close the session after a sequencing failure. The caller holds the
    /// outbound lock; the error is reported and handed back.
    async fn abort(&self, outbound: &mut Outbound, err: SessionError) -> SessionError {
        tracing::error!("closing session: {}", err);
        outbound.tx = None;
        self.teardown().await;
        let copy = match &err {
            SessionError::DuplicateSeq(seq) => SessionError::DuplicateSeq(*seq),
            _ => SessionError::SeqExhausted,
        };
        self.report(copy);
        err
    }

    /// Deliver held events the last transition made legal. The caller
    /// holds the outbound lock.
    async fn release_held(&self, outbound: &mut Outbound) {
        let released = self.lifecycle.lock().await.release();
        for (direction, event) in released {
            match direction {
                Direction::Outbound => {
                    let name = event.event.clone();
                    if let Err(err) = self.transmit(outbound, event.into()).await {
                        tracing::warn!("could not send held event `{}`: {}", name, err);
                    }
                }
                Direction::Inbound => self.deliver(&event).await,
            }
        }
    }

    /// [`release_held`](Self::release_held) for the reader, which does not
    /// hold the outbound lock.
    async fn release_after_inbound(&self) {
        if !self.lifecycle.lock().await.has_held() {
            return;
        }
        let mut outbound = self.outbound.lock().await;
        self.release_held(&mut outbound).await;
    }

    /// Send the response to an inbound request. Unchecked responses skip
    /// the lifecycle (used to answer requests the lifecycle rejected).
    async fn respond(&self, response: Response, checked: bool) {
        let emit_initialized = self.config.auto_initialized
            && self.config.role == Role::Adapter
            && response.success
            && response.command == Command::Initialize.as_str();
        let command = response.command.clone();

        let mut outbound = self.outbound.lock().await;
        if let Err(err) = self.enqueue(&mut outbound, response.into(), checked).await {
            tracing::warn!("could not answer `{}`: {}", command, err);
            self.report(err);
            return;
        }
        if emit_initialized {
            let initialized = Event::new(EventKind::Initialized.as_str(), None);
            if let Err(err) = self.enqueue_event(&mut outbound, initialized).await {
                tracing::warn!("could not emit initialized: {}", err);
                self.report(err);
            }
        }
    }

    /// Record what the handshake and `capabilities` events announce.
    async fn note(&self, message: &ProtocolMessage) {
        match message {
            ProtocolMessage::Request(request) => self.note_request(request).await,
            ProtocolMessage::Response(response) => {
                self.note_response(&response.command, response).await
            }
            ProtocolMessage::Event(event) => self.note_event(event).await,
        }
    }

    async fn note_request(&self, request: &Request) {
        if request.command != Command::Initialize.as_str() {
            return;
        }
        if let Ok(RequestArguments::Initialize(args)) = RequestArguments::from_request(request) {
            let mut coordinates = self.coordinates.lock().await;
            *coordinates = coordinates.with_client(&args);
        }
    }

    async fn note_event(&self, event: &Event) {
        if event.event != EventKind::Capabilities.as_str() {
            return;
        }
        match EventBody::from_event(event) {
            Ok(EventBody::Capabilities(body)) => {
                self.capabilities.lock().await.apply(&body.capabilities)
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("ignoring malformed capabilities event: {}", err),
        }
    }

    async fn note_response(&self, command: &str, response: &Response) {
        if command != Command::Initialize.as_str() || !response.success {
            return;
        }
        let caps = match &response.body {
            Some(body) => match serde_json::from_value::<Capabilities>(body.clone()) {
                Ok(caps) => caps,
                Err(err) => {
                    tracing::warn!("ignoring malformed capabilities: {}", err);
                    return;
                }
            },
            None => Capabilities::default(),
        };
        *self.capabilities.lock().await = AdapterCapabilities::from_initialize_response(&caps);
    }

    async fn handle_payload(self: &Arc<Self>, payload: &[u8]) {
        let message = match ProtocolMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("unreadable message: {}", err);
                if let Some((seq, command)) = peek_request(payload) {
                    let error = ErrorMessage::new(codes::INVALID_REQUEST, "{detail}")
                        .with_variable("detail", err.to_string());
                    self.respond(
                        Response::failure(seq, command, "invalid request", Some(error)),
                        false,
                    )
                    .await;
                }
                self.report(err.into());
                return;
            }
        };

        tracing::debug!("<- {} `{}` seq={}", kind(&message), message.name(), message.seq());
        match message {
            ProtocolMessage::Request(request) => self.on_request(request).await,
            ProtocolMessage::Response(response) => self.on_response(response).await,
            ProtocolMessage::Event(event) => self.on_event(event).await,
        }
    }

    async fn on_request(self: &Arc<Self>, request: Request) {
        let verdict = self
            .lifecycle
            .lock()
            .await
            .observe_request(Direction::Inbound, &request.command);
        if let Err(err) = verdict {
            tracing::warn!(
                "rejecting `{}` (seq {}): {}",
                request.command,
                request.seq,
                err
            );
            let error = ErrorMessage::new(err.code(), "{detail}").with_variable("detail", err.to_string());
            let response = Response::failure(
                request.seq,
                request.command.clone(),
                err.to_string(),
                Some(error),
            );
            self.respond(response, false).await;
            self.report_violation(err);
            return;
        }
        self.note_request(&request).await;
        self.release_after_inbound().await;

        if request.command == Command::Cancel.as_str() {
            self.flag_cancelled(&request).await;
            if !self.router.has_handler(&request.command) {
                self.respond(Response::success(&request, None), true).await;
                return;
            }
        }

        let flag = CancellationFlag::new();
        self.in_flight.lock().await.insert(request.seq, flag.clone());
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let seq = request.seq;
            let response = shared
                .router
                .dispatch(RequestContext::with_flag(request, flag))
                .await;
            shared.in_flight.lock().await.remove(&seq);
            shared.respond(response, true).await;
        });
    }

    async fn flag_cancelled(&self, request: &Request) {
        let args = match RequestArguments::from_request(request) {
            Ok(RequestArguments::Cancel(args)) => args,
            _ => CancelArguments::default(),
        };
        let Some(target) = args.request_id else {
            return;
        };
        match self.in_flight.lock().await.get(&target) {
            Some(flag) => {
                tracing::debug!("cancellation requested for seq {}", target);
                flag.cancel();
            }
            None => tracing::debug!("cancel for seq {} which is not in flight", target),
        }
    }

    async fn on_response(&self, response: Response) {
        let resolved = self.pending.lock().await.resolve(response.request_seq);
        let entry = match resolved {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("{}", err);
                self.report(err);
                return;
            }
        };

        self.lifecycle.lock().await.observe_response(
            Direction::Inbound,
            entry.command(),
            response.success,
        );
        self.note_response(entry.command(), &response).await;
        self.release_after_inbound().await;
        if entry.cancel_requested() {
            tracing::debug!(
                "`{}` (seq {}) finished after cancellation: success={}",
                entry.command(),
                entry.seq(),
                response.success
            );
        }

        let command = entry.command().to_string();
        let request_seq = entry.seq();
        if !entry.complete(response) {
            self.report(SessionError::LateResponse {
                command,
                request_seq,
            });
        }
    }

    async fn on_event(&self, event: Event) {
        let admitted = self
            .lifecycle
            .lock()
            .await
            .admit_event(Direction::Inbound, event);
        match admitted {
            Ok(Some(event)) => self.deliver(&event).await,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("dropping inbound event: {}", err);
                self.report_violation(err);
            }
        }
        self.release_after_inbound().await;
    }

    async fn deliver(&self, event: &Event) {
        self.note_event(event).await;
        self.router.publish(event).await;
    }

    /// Tear down after the transport is gone.
    async fn transport_closed(&self) {
        self.outbound.lock().await.tx = None;
        self.teardown().await;
    }

    /// Terminate the lifecycle and fail every waiter.
    async fn teardown(&self) {
        self.lifecycle.lock().await.terminate();
        let abandoned = self.pending.lock().await.drain();
        if !abandoned.is_empty() {
            tracing::debug!("{} pending requests abandoned", abandoned.len());
        }
    }
}

fn kind(message: &ProtocolMessage) -> &'static str {
    match message {
        ProtocolMessage::Request(_) => "request",
        ProtocolMessage::Response(_) => "response",
        ProtocolMessage::Event(_) => "event",
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut frames: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.next_frame().await {
            Ok(Some(payload)) => shared.handle_payload(&payload).await,
            Ok(None) => {
                tracing::debug!("peer closed the stream");
                break;
            }
            Err(err) => {
                tracing::error!("read failed: {}", err);
                shared.report(err.into());
                break;
            }
        }
    }
    shared.transport_closed().await;
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut frames: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = frames.recv().await {
        if let Err(err) = write_frame(&mut writer, &payload).await {
            tracing::error!("write failed: {}", err);
            drop(frames);
            shared.report(err.into());
            shared.transport_closed().await;
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        tracing::debug!("shutting down writer: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::HandlerResult;
    use dapline_proto::decode_frame;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    /// A session plus the far end of its stream, driven by hand.
    struct Harness {
        session: Session,
        peer: DuplexStream,
        buf: Vec<u8>,
    }

    impl Harness {
        fn new(router: Router, config: SessionConfig) -> Self {
            let (ours, peer) = duplex(64 * 1024);
            let (read, write) = tokio::io::split(ours);
            Self {
                session: Session::spawn(read, write, router, config),
                peer,
                buf: Vec::new(),
            }
        }

        async fn send(&mut self, raw: Value) {
            let payload = serde_json::to_vec(&raw).unwrap();
            write_frame(&mut self.peer, &payload).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            loop {
                if let Some((payload, used)) = decode_frame(&self.buf, 1 << 20).unwrap() {
                    self.buf.drain(..used);
                    return serde_json::from_slice(&payload).unwrap();
                }
                let mut chunk = [0u8; 4096];
                let n = self.peer.read(&mut chunk).await.unwrap();
                assert!(n > 0, "session closed the stream");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    #[test]
    fn engine_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.policy, SequencePolicy::Strict);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.outbound_queue, 64);
        assert!(!config.auto_initialized);
        assert_eq!(SessionConfig::adapter().role, Role::Adapter);
    }

    #[tokio::test]
    async fn engine_client_handshake_over_the_wire() {
        let mut h = Harness::new(Router::new(), SessionConfig::client());
        let session = h.session.clone();
        let init = tokio::spawn(async move {
            session
                .request("initialize", Some(json!({"adapterID": "mock"})))
                .await
        });

        let sent = h.recv().await;
        assert_eq!(sent["seq"], 1);
        assert_eq!(sent["command"], "initialize");
        assert_eq!(h.session.state(), SessionState::Initializing);

        h.send(json!({"seq": 1, "type": "response", "request_seq": 1, "success": true,
            "command": "initialize", "body": {"supportsCancelRequest": true}}))
            .await;
        let response = init.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(h.session.state(), SessionState::Configuring);
        assert!(h.session.capabilities().await.supports_cancel_request);
    }

    #[tokio::test]
    async fn engine_strict_rejects_request_before_initialize() {
        let h = Harness::new(Router::new(), SessionConfig::client());
        let err = h.session.send_request("threads", None).await.unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSequence { .. }));
        assert_eq!(h.session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn engine_lenient_refuses_request_without_sending() {
        let mut h = Harness::new(
            Router::new(),
            SessionConfig {
                policy: SequencePolicy::Lenient,
                ..SessionConfig::client()
            },
        );
        assert_eq!(h.session.policy(), SequencePolicy::Lenient);
        let err = h.session.send_request("threads", None).await.unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSequence { .. }));
        assert_eq!(h.session.pending_count().await, 0);
        assert_eq!(h.session.state(), SessionState::Uninitialized);

        // Nothing reached the wire: the first frame is the next request.
        let reply = h
            .session
            .send_request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap();
        assert_eq!(reply.seq(), 1);
        assert_eq!(h.recv().await["command"], "initialize");
    }

    #[tokio::test]
    async fn engine_lenient_holds_initialized_behind_initialize_response() {
        let mut router = Router::new();
        router.register_handler("initialize", |_ctx: RequestContext| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            HandlerResult::Ok(None)
        });
        let mut h = Harness::new(
            router,
            SessionConfig {
                policy: SequencePolicy::Lenient,
                ..SessionConfig::adapter()
            },
        );
        h.send(json!({"seq": 1, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x"}}))
            .await;
        h.session
            .wait_for_state(SessionState::Initializing)
            .await
            .unwrap();

        h.session.publish_event("initialized", None).await.unwrap();

        let first = h.recv().await;
        let second = h.recv().await;
        assert_eq!(first["type"], "response");
        assert_eq!(first["command"], "initialize");
        assert_eq!(second["type"], "event");
        assert_eq!(second["event"], "initialized");
        assert!(first["seq"].as_i64().unwrap() < second["seq"].as_i64().unwrap());
        assert_eq!(h.session.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn engine_strict_refuses_early_initialized_event() {
        let mut router = Router::new();
        router.register_handler("initialize", |_ctx: RequestContext| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            HandlerResult::Ok(None)
        });
        let mut h = Harness::new(router, SessionConfig::adapter());
        h.send(json!({"seq": 1, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x"}}))
            .await;
        h.session
            .wait_for_state(SessionState::Initializing)
            .await
            .unwrap();
        let err = h.session.publish_event("initialized", None).await.unwrap_err();
        assert!(matches!(err, SessionError::ProtocolSequence { .. }));
        assert_eq!(h.recv().await["type"], "response");
    }

    #[tokio::test]
    async fn engine_lenient_inbound_illegal_request_not_dispatched() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut router = Router::new();
        let counter = Arc::clone(&calls);
        router.register_handler("launch", move |_ctx: RequestContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                HandlerResult::Ok(None)
            }
        });
        let mut h = Harness::new(
            router,
            SessionConfig {
                policy: SequencePolicy::Lenient,
                ..SessionConfig::adapter()
            },
        );
        let mut reports = h.session.take_reports().await.unwrap();
        h.send(json!({"seq": 1, "type": "request", "command": "launch", "arguments": {}}))
            .await;
        let response = h.recv().await;
        assert_eq!(response["success"], false);
        assert_eq!(response["body"]["error"]["id"], codes::SEQUENCE_VIOLATION);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn engine_second_initialize_answered_already_initialized() {
        let mut router = Router::new();
        router.register_handler("initialize", |_ctx: RequestContext| async {
            HandlerResult::Ok(None)
        });
        let mut h = Harness::new(router, SessionConfig::adapter());
        let mut reports = h.session.take_reports().await.unwrap();
        h.send(json!({"seq": 1, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x"}}))
            .await;
        assert_eq!(h.recv().await["success"], true);

        h.send(json!({"seq": 2, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x"}}))
            .await;
        let response = h.recv().await;
        assert_eq!(response["request_seq"], 2);
        assert_eq!(response["success"], false);
        assert_eq!(response["body"]["error"]["id"], codes::ALREADY_INITIALIZED);
        assert!(matches!(
            reports.recv().await,
            Some(SessionError::AlreadyInitialized)
        ));
        assert_eq!(h.session.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn engine_duplicate_seq_closes_session() {
        let h = Harness::new(Router::new(), SessionConfig::client());
        let mut reports = h.session.take_reports().await.unwrap();
        let _stale = h
            .session
            .shared
            .pending
            .lock()
            .await
            .register(1, "initialize")
            .unwrap();

        let err = h
            .session
            .send_request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateSeq(1)));
        assert!(err.is_fatal());
        assert!(matches!(
            reports.recv().await,
            Some(SessionError::DuplicateSeq(1))
        ));
        assert_eq!(h.session.state(), SessionState::Terminated);
        assert!(matches!(
            h.session.publish_event("output", None).await,
            Err(SessionError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn engine_seq_exhaustion_closes_session() {
        let h = Harness::new(Router::new(), SessionConfig::client());
        h.session.shared.outbound.lock().await.seq = SeqCounter::starting_at(i64::MAX);
        let err = h
            .session
            .send_request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SeqExhausted));
        assert_eq!(h.session.state(), SessionState::Terminated);
        assert_eq!(h.session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn engine_reports_are_bounded() {
        let mut h = Harness::new(Router::new(), SessionConfig::client());
        for seq in 0..(REPORT_QUEUE as i64 + 10) {
            h.send(json!({"seq": seq + 1, "type": "response", "request_seq": 5000 + seq,
                "success": true, "command": "threads"}))
                .await;
        }
        // A request after the flood proves the reader kept going.
        let reply = h
            .session
            .send_request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap();
        let sent = h.recv().await;
        h.send(json!({"seq": 9999, "type": "response", "request_seq": sent["seq"],
            "success": true, "command": "initialize"}))
            .await;
        assert!(reply.wait(Duration::from_secs(5)).await.unwrap().success);

        let mut reports = h.session.take_reports().await.unwrap();
        let mut kept = 0;
        while reports.try_recv().is_ok() {
            kept += 1;
        }
        assert_eq!(kept, REPORT_QUEUE);
    }

    #[tokio::test]
    async fn engine_adapter_answers_illegal_request() {
        let mut h = Harness::new(Router::new(), SessionConfig::adapter());
        let mut reports = h.session.take_reports().await.unwrap();
        h.send(json!({"seq": 1, "type": "request", "command": "launch", "arguments": {}}))
            .await;
        let response = h.recv().await;
        assert_eq!(response["type"], "response");
        assert_eq!(response["request_seq"], 1);
        assert_eq!(response["success"], false);
        assert_eq!(response["body"]["error"]["id"], codes::SEQUENCE_VIOLATION);
        assert!(matches!(
            reports.recv().await,
            Some(SessionError::ProtocolSequence { .. })
        ));
        assert!(h.session.take_reports().await.is_none());
    }

    #[tokio::test]
    async fn engine_adapter_auto_initialized_follows_response() {
        let mut router = Router::new();
        router.register_handler("initialize", |_ctx| async {
            HandlerResult::Ok(Some(json!({"supportsConfigurationDoneRequest": true})))
        });
        let mut h = Harness::new(
            router,
            SessionConfig {
                auto_initialized: true,
                ..SessionConfig::adapter()
            },
        );
        h.send(json!({"seq": 1, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x", "linesStartAt1": false}}))
            .await;
        let response = h.recv().await;
        assert_eq!(response["type"], "response");
        assert_eq!(response["seq"], 1);
        let event = h.recv().await;
        assert_eq!(event["event"], "initialized");
        assert_eq!(event["seq"], 2);
        assert_eq!(h.session.state(), SessionState::Configuring);
        assert!(
            h.session
                .capabilities()
                .await
                .supports_configuration_done_request
        );
        assert!(!h.session.coordinates().await.client_lines_start_at1);
    }

    #[tokio::test]
    async fn engine_unparseable_request_still_answered() {
        let mut h = Harness::new(Router::new(), SessionConfig::adapter());
        h.send(json!({"seq": 4, "type": "request", "command": 17})).await;
        let response = h.recv().await;
        assert_eq!(response["request_seq"], 4);
        assert_eq!(response["success"], false);
        assert_eq!(response["message"], "invalid request");
    }

    #[tokio::test]
    async fn engine_unknown_message_type_keeps_stream_open() {
        let mut h = Harness::new(Router::new(), SessionConfig::adapter());
        let mut reports = h.session.take_reports().await.unwrap();
        h.send(json!({"seq": 1, "type": "notification"})).await;
        assert!(matches!(
            reports.recv().await,
            Some(SessionError::Message(_))
        ));
        h.send(json!({"seq": 2, "type": "request", "command": "initialize",
            "arguments": {"adapterID": "x"}}))
            .await;
        let response = h.recv().await;
        assert_eq!(response["command"], "initialize");
        assert_eq!(response["message"], "notImplemented");
    }

    #[tokio::test(start_paused = true)]
    async fn engine_request_times_out_and_late_response_is_dropped() {
        let mut h = Harness::new(
            Router::new(),
            SessionConfig {
                request_timeout: Duration::from_millis(50),
                ..SessionConfig::client()
            },
        );
        let mut reports = h.session.take_reports().await.unwrap();
        let err = h
            .session
            .request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { seq: 1, .. }));
        assert_eq!(h.session.pending_count().await, 1);

        let _ = h.recv().await;
        h.send(json!({"seq": 1, "type": "response", "request_seq": 1, "success": true,
            "command": "initialize"}))
            .await;
        assert!(matches!(
            reports.recv().await,
            Some(SessionError::LateResponse { request_seq: 1, .. })
        ));
        assert_eq!(h.session.pending_count().await, 0);
        assert_eq!(h.session.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn engine_peer_close_terminates_and_fails_waiters() {
        let h = Harness::new(Router::new(), SessionConfig::client());
        let reply = h
            .session
            .send_request("initialize", Some(json!({"adapterID": "x"})))
            .await
            .unwrap();
        drop(h.peer);
        assert!(matches!(
            reply.response().await,
            Err(SessionError::ChannelClosed)
        ));
        h.session
            .wait_for_state(SessionState::Terminated)
            .await
            .unwrap();
        assert!(matches!(
            h.session.publish_event("output", None).await,
            Err(SessionError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn engine_cancel_requires_capability_as_client() {
        let h = Harness::new(Router::new(), SessionConfig::client());
        assert!(matches!(
            h.session.cancel(1).await,
            Err(SessionError::NotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn engine_close_flushes_and_ends_stream() {
        let mut h = Harness::new(
            Router::new(),
            SessionConfig {
                policy: SequencePolicy::Lenient,
                ..SessionConfig::adapter()
            },
        );
        h.session
            .publish_event("output", Some(json!({"output": "bye\n"})))
            .await
            .unwrap();
        h.session.close().await;
        assert_eq!(h.recv().await["event"], "output");
        let mut rest = Vec::new();
        h.peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(h.session.state(), SessionState::Terminated);
    }
}
