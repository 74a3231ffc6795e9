//! The protocol envelope: requests, responses and events.
//!
//! Payloads (`arguments`, `body`) stay opaque JSON at this level; the
//! typed view lives in [`crate::catalog`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::MessageError;

/// Any DAP message, discriminated on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    /// A request from either endpoint.
    Request(Request),
    /// A response to an earlier request.
    Response(Response),
    /// An unsolicited event.
    Event(Event),
}

impl ProtocolMessage {
    /// Parse a frame payload into a message.
    ///
    /// Unknown `type` values fail with [`MessageError::UnknownMessageType`];
    /// unknown command and event names are accepted as-is.
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(MessageError::UnknownMessageType(other.to_string())),
            None => return Err(MessageError::MissingType),
        };
        match kind.as_str() {
            "request" => Ok(Self::Request(serde_json::from_value(value)?)),
            "response" => Ok(Self::Response(serde_json::from_value(value)?)),
            "event" => Ok(Self::Event(serde_json::from_value(value)?)),
            _ => Err(MessageError::UnknownMessageType(kind)),
        }
    }

    /// Serialize to the JSON payload of one frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Sequence number of this message.
    pub fn seq(&self) -> i64 {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
            Self::Event(e) => e.seq,
        }
    }

    /// Stamp the sender's sequence number.
    pub fn set_seq(&mut self, seq: i64) {
        match self {
            Self::Request(r) => r.seq = seq,
            Self::Response(r) => r.seq = seq,
            Self::Event(e) => e.seq = seq,
        }
    }

    /// The command or event name carried by this message.
    pub fn name(&self) -> &str {
        match self {
            Self::Request(r) => &r.command,
            Self::Response(r) => &r.command,
            Self::Event(e) => &e.event,
        }
    }
}

impl From<Request> for ProtocolMessage {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for ProtocolMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Event> for ProtocolMessage {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

/// Best-effort recovery of `(seq, command)` from a payload that claims to
/// be a request but failed to parse, so it can still be answered.
pub fn peek_request(bytes: &[u8]) -> Option<(i64, String)> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    if value.get("type")?.as_str()? != "request" {
        return None;
    }
    let seq = value.get("seq")?.as_i64()?;
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((seq, command))
}

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number.
    pub seq: i64,
    /// The command to execute.
    pub command: String,
    /// Command arguments (optional).
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub arguments: Option<Value>,
}

impl Request {
    /// Build an unsequenced request; the sender stamps `seq`.
    pub fn new(command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq: 0,
            command: command.into(),
            arguments,
        }
    }
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number.
    pub seq: i64,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Whether the request was successful.
    pub success: bool,
    /// The command this response is for.
    pub command: String,
    /// Raw error in short form if `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body (command-specific).
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

impl Response {
    /// Predefined `message` value for a request that was cancelled.
    pub const CANCELLED: &'static str = "cancelled";

    /// A successful response to `request`.
    pub fn success(request: &Request, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    /// A failed response carrying a short `message` and an optional
    /// structured error in `body.error`.
    pub fn failure(
        request_seq: i64,
        command: impl Into<String>,
        message: impl Into<String>,
        error: Option<ErrorMessage>,
    ) -> Self {
        Self {
            seq: 0,
            request_seq,
            success: false,
            command: command.into(),
            message: Some(message.into()),
            body: error.map(|e| serde_json::json!({ "error": e })),
        }
    }

    /// The structured error from `body.error`, if present and well-formed.
    pub fn error_message(&self) -> Option<ErrorMessage> {
        let error = self.body.as_ref()?.get("error")?;
        serde_json::from_value(error.clone()).ok()
    }

    /// Whether the peer reported this request as cancelled.
    pub fn is_cancelled(&self) -> bool {
        !self.success && self.message.as_deref() == Some(Self::CANCELLED)
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number.
    pub seq: i64,
    /// The event type.
    pub event: String,
    /// Event body (event-specific).
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

impl Event {
    /// Build an unsequenced event; the sender stamps `seq`.
    pub fn new(event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body,
        }
    }
}

/// A structured, user-presentable error message (`ErrorResponse.body.error`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Unique identifier for the message.
    pub id: i64,
    /// Format string; variables are embedded as `{name}`.
    pub format: String,
    /// Values for the placeholders in `format`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Whether the message may be sent to telemetry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_telemetry: Option<bool>,
    /// Whether the message should be shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_user: Option<bool>,
    /// Where to find more information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Label for `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_label: Option<String>,
}

impl ErrorMessage {
    /// Create a message with the given id and format string.
    pub fn new(id: i64, format: impl Into<String>) -> Self {
        Self {
            id,
            format: format.into(),
            ..Default::default()
        }
    }

    /// Add a placeholder value.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Mark the message as user-visible.
    pub fn for_user(mut self) -> Self {
        self.show_user = Some(true);
        self
    }

    /// Substitute `{name}` placeholders from `variables`.
    ///
    /// With `exclude_pii`, only variables whose name starts with `_` are
    /// substituted; the rest keep their placeholder. Placeholders without
    /// a value are left untouched.
    pub fn render(&self, exclude_pii: bool) -> String {
        let mut out = String::with_capacity(self.format.len());
        let mut rest = self.format.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            let allowed = !exclude_pii || name.starts_with('_');
            match self.variables.get(name) {
                Some(value) if allowed && !name.is_empty() => out.push_str(value),
                _ => out.push_str(&rest[start..start + end + 2]),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Distinguish an explicit `null` (`Some(Null)`) from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(msg: ProtocolMessage) {
        let bytes = msg.to_bytes().unwrap();
        let decoded = ProtocolMessage::parse(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn message_parse_request() {
        let raw = br#"{"seq":1,"type":"request","command":"initialize","arguments":{}}"#;
        match ProtocolMessage::parse(raw).unwrap() {
            ProtocolMessage::Request(req) => {
                assert_eq!(req.seq, 1);
                assert_eq!(req.command, "initialize");
                assert_eq!(req.arguments, Some(json!({})));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn message_parse_response() {
        let raw = br#"{"seq":1,"type":"response","request_seq":1,"success":true,"command":"initialize","body":{"supportsConfigurationDoneRequest":true}}"#;
        match ProtocolMessage::parse(raw).unwrap() {
            ProtocolMessage::Response(resp) => {
                assert_eq!(resp.request_seq, 1);
                assert!(resp.success);
                assert_eq!(resp.body.unwrap()["supportsConfigurationDoneRequest"], true);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn message_parse_event_without_body() {
        let raw = br#"{"seq":3,"type":"event","event":"initialized"}"#;
        match ProtocolMessage::parse(raw).unwrap() {
            ProtocolMessage::Event(evt) => {
                assert_eq!(evt.event, "initialized");
                assert!(evt.body.is_none());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn message_unknown_type_rejected() {
        let err = ProtocolMessage::parse(br#"{"seq":1,"type":"notification"}"#).unwrap_err();
        assert!(matches!(err, MessageError::UnknownMessageType(t) if t == "notification"));
    }

    #[test]
    fn message_missing_type_rejected() {
        let err = ProtocolMessage::parse(br#"{"seq":1,"command":"next"}"#).unwrap_err();
        assert!(matches!(err, MessageError::MissingType));
    }

    #[test]
    fn message_invalid_json_rejected() {
        let err = ProtocolMessage::parse(b"not json").unwrap_err();
        assert!(matches!(err, MessageError::Json(_)));
    }

    #[test]
    fn message_unknown_command_preserved() {
        let raw = br#"{"seq":9,"type":"request","command":"vendorMagic","arguments":{"x":[1,2]}}"#;
        match ProtocolMessage::parse(raw).unwrap() {
            ProtocolMessage::Request(req) => {
                assert_eq!(req.command, "vendorMagic");
                assert_eq!(req.arguments, Some(json!({"x": [1, 2]})));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn message_roundtrip_variants() {
        roundtrip(
            Request {
                seq: 1,
                command: "launch".into(),
                arguments: Some(json!({"program": "/bin/app", "args": ["-v"]})),
            }
            .into(),
        );
        roundtrip(Response::failure(4, "evaluate", "notAvailable", Some(ErrorMessage::new(7, "x"))).into());
        roundtrip(Event::new("output", Some(json!({"output": "hi\n"}))).into());
    }

    #[test]
    fn message_roundtrip_keeps_explicit_null() {
        let msg: ProtocolMessage = Request {
            seq: 2,
            command: "threads".into(),
            arguments: Some(Value::Null),
        }
        .into();
        let bytes = msg.to_bytes().unwrap();
        assert!(String::from_utf8(bytes.clone()).unwrap().contains("\"arguments\":null"));
        assert_eq!(ProtocolMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn message_serialize_is_deterministic() {
        let msg: ProtocolMessage =
            Event::new("stopped", Some(json!({"threadId": 1, "reason": "step"}))).into();
        assert_eq!(msg.to_bytes().unwrap(), msg.to_bytes().unwrap());
        let text = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(text.starts_with(r#"{"type":"event","seq":0,"event":"stopped""#));
    }

    #[test]
    fn message_set_seq_and_name() {
        let mut msg: ProtocolMessage = Request::new("next", None).into();
        msg.set_seq(42);
        assert_eq!(msg.seq(), 42);
        assert_eq!(msg.name(), "next");
    }

    #[test]
    fn response_failure_carries_error_body() {
        let err = ErrorMessage::new(1001, "cannot read {path}").with_variable("path", "/tmp/x");
        let resp = Response::failure(3, "source", "notFound", Some(err.clone()));
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("notFound"));
        assert_eq!(resp.error_message(), Some(err));
    }

    #[test]
    fn response_cancelled_detection() {
        let resp = Response::failure(3, "stackTrace", Response::CANCELLED, None);
        assert!(resp.is_cancelled());
        let req = Request::new("stackTrace", None);
        assert!(!Response::success(&req, None).is_cancelled());
    }

    #[test]
    fn peek_request_salvages_identity() {
        let raw = br#"{"seq":12,"type":"request","command":"next","arguments":"oops"}"#;
        assert_eq!(peek_request(raw), Some((12, "next".to_string())));
        assert_eq!(peek_request(br#"{"seq":1,"type":"event"}"#), None);
        assert_eq!(peek_request(b"garbage"), None);
    }

    #[test]
    fn error_message_render_substitutes_variables() {
        let msg = ErrorMessage::new(1, "file {path} has {_count} lines")
            .with_variable("path", "/home/me/secret.rs")
            .with_variable("_count", "12");
        assert_eq!(msg.render(false), "file /home/me/secret.rs has 12 lines");
        assert_eq!(msg.render(true), "file {path} has 12 lines");
    }

    #[test]
    fn error_message_render_leaves_unknown_and_unterminated() {
        let msg = ErrorMessage::new(1, "{missing} and {open");
        assert_eq!(msg.render(false), "{missing} and {open");
    }

    #[test]
    fn error_message_serializes_camel_case() {
        let msg = ErrorMessage::new(5, "boom").for_user();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["showUser"], true);
        assert!(value.get("variables").is_none());
        assert!(value.get("urlLabel").is_none());
    }
}
