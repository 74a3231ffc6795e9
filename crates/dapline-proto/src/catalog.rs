//! Catalogue of known DAP commands and events, and the typed view of
//! their payloads.
//!
//! Names outside the catalogue are not errors: they surface as
//! [`RequestArguments::Other`] / [`EventBody::Other`] with the raw JSON.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::MessageError;
use crate::message::{Event, Request};
use crate::types::*;

macro_rules! name_registry {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident => $wire:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
        }

        impl $name {
            /// Every known name, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Look up a wire name. Matching is case-sensitive.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// The wire name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

name_registry! {
    /// A request command known to this catalogue.
    pub enum Command {
        Attach => "attach",
        BreakpointLocations => "breakpointLocations",
        Cancel => "cancel",
        Completions => "completions",
        ConfigurationDone => "configurationDone",
        Continue => "continue",
        DataBreakpointInfo => "dataBreakpointInfo",
        Disassemble => "disassemble",
        Disconnect => "disconnect",
        Evaluate => "evaluate",
        ExceptionInfo => "exceptionInfo",
        Goto => "goto",
        GotoTargets => "gotoTargets",
        Initialize => "initialize",
        Launch => "launch",
        LoadedSources => "loadedSources",
        Modules => "modules",
        Next => "next",
        Pause => "pause",
        ReadMemory => "readMemory",
        RestartFrame => "restartFrame",
        Restart => "restart",
        ReverseContinue => "reverseContinue",
        RunInTerminal => "runInTerminal",
        Scopes => "scopes",
        SetBreakpoints => "setBreakpoints",
        SetDataBreakpoints => "setDataBreakpoints",
        SetExceptionBreakpoints => "setExceptionBreakpoints",
        SetExpression => "setExpression",
        SetFunctionBreakpoints => "setFunctionBreakpoints",
        SetVariable => "setVariable",
        Source => "source",
        StackTrace => "stackTrace",
        StepBack => "stepBack",
        StepIn => "stepIn",
        StepInTargets => "stepInTargets",
        StepOut => "stepOut",
        Terminate => "terminate",
        TerminateThreads => "terminateThreads",
        Threads => "threads",
        Variables => "variables",
    }
}

name_registry! {
    /// An event known to this catalogue.
    pub enum EventKind {
        Breakpoint => "breakpoint",
        Capabilities => "capabilities",
        Continued => "continued",
        Exited => "exited",
        Initialized => "initialized",
        LoadedSource => "loadedSource",
        Module => "module",
        Output => "output",
        Process => "process",
        Stopped => "stopped",
        Terminated => "terminated",
        Thread => "thread",
    }
}

impl Command {
    /// Whether the request ends the debug session when sent.
    pub fn ends_session(self) -> bool {
        matches!(self, Command::Disconnect | Command::Terminate)
    }
}

impl EventKind {
    /// Whether the event announces the end of the debuggee.
    pub fn ends_session(self) -> bool {
        matches!(self, EventKind::Terminated | EventKind::Exited)
    }
}

/// Typed request arguments, one variant per catalogued command shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestArguments {
    /// `initialize`: client identity and its line/column/path conventions.
    Initialize(InitializeRequestArguments),
    /// `configurationDone`: takes no arguments.
    ConfigurationDone,
    /// `launch`: adapter-specific settings, kept in `extra`.
    Launch(LaunchRequestArguments),
    /// `attach`: adapter-specific settings, kept in `extra`.
    Attach(AttachRequestArguments),
    /// `disconnect`.
    Disconnect(DisconnectArguments),
    /// `terminate`.
    Terminate(TerminateArguments),
    /// `cancel`: names the request or progress to abandon.
    Cancel(CancelArguments),
    /// `setBreakpoints`: the full set for one source.
    SetBreakpoints(SetBreakpointsArguments),
    /// `setExceptionBreakpoints`: enabled filter ids.
    SetExceptionBreakpoints(SetExceptionBreakpointsArguments),
    /// `continue`.
    Continue(ContinueArguments),
    /// `next`.
    Next(StepArguments),
    /// `stepIn`.
    StepIn(StepArguments),
    /// `stepOut`.
    StepOut(StepArguments),
    /// `pause`.
    Pause(PauseArguments),
    /// `threads`: takes no arguments.
    Threads,
    /// `stackTrace`.
    StackTrace(StackTraceArguments),
    /// `scopes`.
    Scopes(ScopesArguments),
    /// `variables`.
    Variables(VariablesArguments),
    /// `evaluate`.
    Evaluate(EvaluateArguments),
    /// `runInTerminal` (a reverse request, adapter to client).
    RunInTerminal(RunInTerminalRequestArguments),
    /// Any command without a typed shape here, arguments kept verbatim.
    Other {
        /// The command name as received.
        command: String,
        /// The raw `arguments` field, if any.
        arguments: Option<Value>,
    },
}

impl RequestArguments {
    /// Decode the arguments of `request` according to its command.
    ///
    /// Absent arguments decode as an empty object, so commands whose
    /// arguments are all optional accept a bare request.
    pub fn from_request(request: &Request) -> Result<Self, MessageError> {
        let name = request.command.as_str();
        let args = request.arguments.as_ref();
        let Some(command) = Command::from_name(name) else {
            return Ok(Self::other(request));
        };
        Ok(match command {
            Command::Initialize => Self::Initialize(typed(name, args)?),
            Command::ConfigurationDone => Self::ConfigurationDone,
            Command::Launch => Self::Launch(typed(name, args)?),
            Command::Attach => Self::Attach(typed(name, args)?),
            Command::Disconnect => Self::Disconnect(typed(name, args)?),
            Command::Terminate => Self::Terminate(typed(name, args)?),
            Command::Cancel => Self::Cancel(typed(name, args)?),
            Command::SetBreakpoints => Self::SetBreakpoints(typed(name, args)?),
            Command::SetExceptionBreakpoints => Self::SetExceptionBreakpoints(typed(name, args)?),
            Command::Continue => Self::Continue(typed(name, args)?),
            Command::Next => Self::Next(typed(name, args)?),
            Command::StepIn => Self::StepIn(typed(name, args)?),
            Command::StepOut => Self::StepOut(typed(name, args)?),
            Command::Pause => Self::Pause(typed(name, args)?),
            Command::Threads => Self::Threads,
            Command::StackTrace => Self::StackTrace(typed(name, args)?),
            Command::Scopes => Self::Scopes(typed(name, args)?),
            Command::Variables => Self::Variables(typed(name, args)?),
            Command::Evaluate => Self::Evaluate(typed(name, args)?),
            Command::RunInTerminal => Self::RunInTerminal(typed(name, args)?),
            _ => Self::other(request),
        })
    }

    fn other(request: &Request) -> Self {
        Self::Other {
            command: request.command.clone(),
            arguments: request.arguments.clone(),
        }
    }
}

/// Typed event bodies, one variant per catalogued event shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// `initialized`: carries no body.
    Initialized,
    /// `stopped`.
    Stopped(StoppedEventBody),
    /// `continued`.
    Continued(ContinuedEventBody),
    /// `exited`: the debuggee's exit code.
    Exited(ExitedEventBody),
    /// `terminated`.
    Terminated(TerminatedEventBody),
    /// `thread`: a thread started or exited.
    Thread(ThreadEventBody),
    /// `output`.
    Output(OutputEventBody),
    /// `breakpoint`: a breakpoint changed, appeared or went away.
    Breakpoint(BreakpointEventBody),
    /// `capabilities`: changed capabilities only.
    Capabilities(CapabilitiesEventBody),
    /// `process`.
    Process(ProcessEventBody),
    /// `loadedSource`.
    LoadedSource(LoadedSourceEventBody),
    /// Any event without a typed shape here, body kept verbatim.
    Other {
        /// The event name as received.
        event: String,
        /// The raw `body` field, if any.
        body: Option<Value>,
    },
}

impl EventBody {
    /// Decode the body of `event` according to its name.
    pub fn from_event(event: &Event) -> Result<Self, MessageError> {
        let name = event.event.as_str();
        let body = event.body.as_ref();
        let Some(kind) = EventKind::from_name(name) else {
            return Ok(Self::other(event));
        };
        Ok(match kind {
            EventKind::Initialized => Self::Initialized,
            EventKind::Stopped => Self::Stopped(typed(name, body)?),
            EventKind::Continued => Self::Continued(typed(name, body)?),
            EventKind::Exited => Self::Exited(typed(name, body)?),
            EventKind::Terminated => Self::Terminated(typed(name, body)?),
            EventKind::Thread => Self::Thread(typed(name, body)?),
            EventKind::Output => Self::Output(typed(name, body)?),
            EventKind::Breakpoint => Self::Breakpoint(typed(name, body)?),
            EventKind::Capabilities => Self::Capabilities(typed(name, body)?),
            EventKind::Process => Self::Process(typed(name, body)?),
            EventKind::LoadedSource => Self::LoadedSource(typed(name, body)?),
            EventKind::Module => Self::other(event),
        })
    }

    fn other(event: &Event) -> Self {
        Self::Other {
            event: event.event.clone(),
            body: event.body.clone(),
        }
    }
}

fn typed<T: DeserializeOwned>(name: &str, payload: Option<&Value>) -> Result<T, MessageError> {
    let value = match payload {
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(value) => value.clone(),
    };
    serde_json::from_value(value).map_err(|e| MessageError::InvalidArguments {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
