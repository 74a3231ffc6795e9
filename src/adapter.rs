//! The null adapter: a debug adapter with no debuggee behind it.
//!
//! It walks a client through the whole lifecycle (initialize, launch or
//! attach, configuration, disconnect) and answers the common inspection
//! requests with fixed data. `evaluate` understands `sleep <ms>`, which
//! holds the request open and honours `cancel`.

use std::time::Duration;

use dapline_proto::{
    Breakpoint, Capabilities, EvaluateResponseBody, RequestArguments, SetBreakpointsResponseBody,
    Thread, ThreadsResponseBody,
};
use dapline_config::{Config, ConfigError, RoleSetting};
use dapline_session::{HandlerError, HandlerResult, RequestContext, Router, SessionConfig};
use serde::Serialize;

/// Identifier of the single thread the null adapter reports.
pub const MAIN_THREAD_ID: i64 = 1;

const SLEEP_POLL: Duration = Duration::from_millis(10);

/// Capabilities advertised in the `initialize` response.
pub fn capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: Some(true),
        supports_terminate_request: Some(true),
        supports_cancel_request: Some(true),
        ..Default::default()
    }
}

/// Engine settings for serving the null adapter.
///
/// No handler sends `initialized`, so the engine emits it after the
/// `initialize` response.
pub fn session_config() -> SessionConfig {
    SessionConfig {
        auto_initialized: true,
        ..SessionConfig::adapter()
    }
}

/// Engine settings from a loaded config, checked for the null adapter.
pub fn session_config_from(config: &Config) -> Result<SessionConfig, ConfigError> {
    if config.session.role != RoleSetting::Adapter {
        return Err(ConfigError::Validation {
            field: "session.role".to_string(),
            message: "the null adapter only serves the adapter role".to_string(),
        });
    }
    if !config.session.auto_initialized {
        tracing::warn!("session.auto_initialized = false ignored: the null adapter needs it");
    }
    Ok(SessionConfig {
        auto_initialized: true,
        ..config.session_config()
    })
}

/// A router with every null adapter handler registered.
pub fn router() -> Router {
    let mut router = Router::new();
    router.register_handler("initialize", initialize);
    router.register_handler("launch", ack);
    router.register_handler("attach", ack);
    router.register_handler("configurationDone", ack);
    router.register_handler("setBreakpoints", set_breakpoints);
    router.register_handler("setExceptionBreakpoints", ack);
    router.register_handler("threads", threads);
    router.register_handler("evaluate", evaluate);
    router.register_handler("disconnect", ack);
    router.register_handler("terminate", ack);
    router
}

/// Success with no body.
async fn ack(_ctx: RequestContext) -> HandlerResult {
    Ok(None)
}

async fn initialize(ctx: RequestContext) -> HandlerResult {
    if let RequestArguments::Initialize(args) = ctx.arguments()? {
        tracing::info!(
            "initialize from {} for adapter `{}`",
            args.client_name.as_deref().unwrap_or("unknown client"),
            args.adapter_id
        );
    }
    body(&capabilities())
}

async fn set_breakpoints(ctx: RequestContext) -> HandlerResult {
    let RequestArguments::SetBreakpoints(args) = ctx.arguments()? else {
        return Err(HandlerError::new("invalid arguments"));
    };
    let breakpoints = args
        .breakpoints
        .unwrap_or_default()
        .into_iter()
        .map(|bp| Breakpoint {
            id: None,
            verified: false,
            message: Some("no debuggee".to_string()),
            source: Some(args.source.clone()),
            line: Some(bp.line),
            column: bp.column,
        })
        .collect();
    body(&SetBreakpointsResponseBody { breakpoints })
}

async fn threads(_ctx: RequestContext) -> HandlerResult {
    body(&ThreadsResponseBody {
        threads: vec![Thread {
            id: MAIN_THREAD_ID,
            name: "main".to_string(),
        }],
    })
}

async fn evaluate(ctx: RequestContext) -> HandlerResult {
    let RequestArguments::Evaluate(args) = ctx.arguments()? else {
        return Err(HandlerError::new("invalid arguments"));
    };
    let expression = args.expression.trim();

    if let Some(ms) = expression.strip_prefix("sleep ") {
        let ms: u64 = ms
            .trim()
            .parse()
            .map_err(|_| HandlerError::new(format!("bad duration `{ms}`")))?;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
        while tokio::time::Instant::now() < deadline {
            if ctx.is_cancelled() {
                return Err(HandlerError::cancelled());
            }
            tokio::time::sleep(SLEEP_POLL).await;
        }
    }

    body(&EvaluateResponseBody {
        result: expression.to_string(),
        result_type: None,
        variables_reference: 0,
    })
}

fn body<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| HandlerError::new(format!("failed to encode response body: {e}")))
}
