//! Dispatch of inbound requests to handlers and fan-out of events to
//! subscribers.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dapline_proto::{Command, ErrorMessage, Event, MessageError, Request, RequestArguments, Response};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::error::codes;

/// Boxed future returned by handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What a handler produces: a response body, or a failure.
pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// A request handler.
pub type Handler = Arc<dyn Fn(RequestContext) -> BoxFuture<HandlerResult> + Send + Sync>;

/// A handler failure, turned into a `success: false` response.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Short failure message for `Response.message`.
    pub message: String,
    /// Structured error for `Response.body.error`.
    pub error: Option<ErrorMessage>,
}

impl HandlerError {
    /// A failure with only a short message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    /// Attach a structured error.
    pub fn with_error(mut self, error: ErrorMessage) -> Self {
        self.error = Some(error);
        self
    }

    /// The failure a handler returns after honouring a cancellation.
    pub fn cancelled() -> Self {
        Self::new(Response::CANCELLED)
    }

    fn into_response(self, request: &Request) -> Response {
        Response::failure(request.seq, request.command.clone(), self.message, self.error)
    }
}

impl From<MessageError> for HandlerError {
    fn from(err: MessageError) -> Self {
        let detail = err.to_string();
        Self::new("invalid arguments").with_error(
            ErrorMessage::new(codes::INVALID_REQUEST, "{detail}").with_variable("detail", detail),
        )
    }
}

/// Cooperative cancellation flag shared between the engine and a handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a handler gets for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: Request,
    cancel: CancellationFlag,
}

impl RequestContext {
    /// Wrap a request with a fresh cancellation flag.
    pub fn new(request: Request) -> Self {
        Self::with_flag(request, CancellationFlag::new())
    }

    /// Wrap a request with an existing flag.
    pub fn with_flag(request: Request, cancel: CancellationFlag) -> Self {
        Self { request, cancel }
    }

    /// The request being handled.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request's command.
    pub fn command(&self) -> &str {
        &self.request.command
    }

    /// Decode the request's arguments into their typed shape.
    pub fn arguments(&self) -> Result<RequestArguments, MessageError> {
        RequestArguments::from_request(&self.request)
    }

    /// Whether the peer asked to cancel this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The shared cancellation flag.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }
}

struct Subscriber {
    event: Option<String>,
    tx: mpsc::UnboundedSender<Event>,
}

/// Routes requests to handlers and events to subscribers.
pub struct Router {
    handlers: HashMap<String, Handler>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Router {
    /// Create a router with no handlers or subscribers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register the handler for `command`, replacing any previous one.
    pub fn register_handler<F, Fut>(&mut self, command: impl Into<String>, handler: F)
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let command = command.into();
        let handler: Handler =
            Arc::new(move |ctx: RequestContext| -> BoxFuture<HandlerResult> { Box::pin(handler(ctx)) });
        if self.handlers.insert(command.clone(), handler).is_some() {
            tracing::debug!("replaced handler for `{}`", command);
        }
    }

    /// Whether a handler is registered for `command`.
    pub fn has_handler(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Run the handler for the request in `ctx` and build its response.
    ///
    /// Always produces exactly one response. A handler that panics yields a
    /// failure response.
    pub async fn dispatch(&self, ctx: RequestContext) -> Response {
        let request = ctx.request().clone();
        let Some(handler) = self.handlers.get(&request.command) else {
            return unhandled(&request);
        };

        match tokio::spawn(handler(ctx)).await {
            Ok(Ok(body)) => Response::success(&request, body),
            Ok(Err(err)) => {
                tracing::debug!("handler for `{}` failed: {}", request.command, err);
                err.into_response(&request)
            }
            Err(join) => {
                tracing::error!("handler for `{}` aborted: {}", request.command, join);
                HandlerError::new("handler failed")
                    .with_error(ErrorMessage::new(
                        codes::HANDLER_FAILED,
                        "the handler for '{command}' did not complete",
                    )
                    .with_variable("command", request.command.clone()))
                    .into_response(&request)
            }
        }
    }

    /// Subscribe to events named `event`.
    pub async fn subscribe(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Event> {
        self.add_subscriber(Some(event.into())).await
    }

    /// Subscribe to every event.
    pub async fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Event> {
        self.add_subscriber(None).await
    }

    async fn add_subscriber(&self, event: Option<String>) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(Subscriber { event, tx });
        rx
    }

    /// Deliver `event` to every matching subscriber. Returns how many
    /// received it; closed subscribers are pruned.
    pub async fn publish(&self, event: &Event) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.event.as_deref().is_some_and(|name| name != event.event) {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        if delivered == 0 {
            tracing::debug!("event `{}` had no subscribers", event.event);
        }
        delivered
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn unhandled(request: &Request) -> Response {
    if Command::from_name(&request.command).is_some() {
        tracing::debug!("no handler for `{}`", request.command);
        HandlerError::new("notImplemented")
            .with_error(
                ErrorMessage::new(codes::NOT_IMPLEMENTED, "'{command}' is not implemented")
                    .with_variable("command", request.command.clone()),
            )
            .into_response(request)
    } else {
        tracing::warn!("unrecognized command `{}`", request.command);
        HandlerError::new(format!("unrecognized command '{}'", request.command))
            .with_error(
                ErrorMessage::new(codes::UNRECOGNIZED_COMMAND, "unrecognized command '{command}'")
                    .with_variable("command", request.command.clone()),
            )
            .into_response(request)
    }
}
