//! Bridge Protocol - wire types shared by the bridge server and its clients
//!
//! JSON-RPC 2.0 messages, the bridge error-code taxonomy, document
//! coordinate types, and the canonical method/event name lists.
//! The `framing` module adds a Content-Length codec for byte streams.

pub mod framing;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version reported by `bridge.ping` and `bridge.capabilities`.
pub const PROTOCOL_VERSION: &str = "v1";

// ============================================================================
// Error Codes
// ============================================================================

/// Bridge error taxonomy.
///
/// These are deliberately not HTTP-like: every failure a handler can produce
/// maps to exactly one of these, and clients branch on the code rather than
/// on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_AUTH")]
    Auth,
    #[serde(rename = "E_INVALID_PARAMS")]
    InvalidParams,
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
    #[serde(rename = "E_PERMISSION")]
    Permission,
    #[serde(rename = "E_UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "E_FAILED")]
    Failed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "E_AUTH",
            Self::InvalidParams => "E_INVALID_PARAMS",
            Self::NotFound => "E_NOT_FOUND",
            Self::Permission => "E_PERMISSION",
            Self::Unsupported => "E_UNSUPPORTED",
            Self::Failed => "E_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JSON-RPC Messages
// ============================================================================

/// Request id: string, number, or null (null means fire-and-forget).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

impl RequestId {
    /// Null ids mark notifications: no response is ever produced for them.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::Null
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Structured error carried in an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response (success or error, never both).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Success response for `id`.
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response for `id`.
    pub fn err(id: RequestId, code: ErrorCode, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// Server-initiated notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Check whether a decoded value has the shape of a JSON-RPC request.
pub fn is_request(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && obj.get("method").map(Value::is_string).unwrap_or(false)
        && obj.contains_key("id")
}

// ============================================================================
// Document Types
// ============================================================================

/// Zero-based line/character position within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// A single text replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// Diagnostic severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

/// One diagnostic as reported by the editor host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub message: String,
    pub severity: DiagnosticSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// ============================================================================
// Method / Event Surface
// ============================================================================

/// Every method the gateway dispatches. `bridge.capabilities` returns this
/// list verbatim so callers never hardcode a protocol version.
pub const METHODS: &[&str] = &[
    "bridge.ping",
    "bridge.capabilities",
    "workspace.info",
    "events.subscribe",
    "events.unsubscribe",
    "diagnostics.list",
    "doc.read",
    "doc.applyEdits",
    "doc.format",
    "tasks.list",
    "tasks.run",
    "tasks.terminate",
    "tasks.awaitExit",
    "command.execute",
    "refactor.codeActions",
    "refactor.codeActions.apply",
    "refactor.rename",
    "refactor.organizeImports",
    "debug.sessions",
    "debug.start",
    "debug.stop",
    "debug.awaitTermination",
    "tx.begin",
    "tx.stageEdits",
    "tx.stageRename",
    "tx.stageFix",
    "tx.preview",
    "tx.commit",
    "tx.rollback",
    "tx.snapshot.create",
    "tx.snapshot.restore",
    "agent.planAndExecute",
];

/// Event names that `events.subscribe` accepts in its filter.
pub const EVENTS: &[&str] = &[
    "diagnostics.changed",
    "tasks.exit",
    "debug.sessionStarted",
    "debug.sessionTerminated",
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_roundtrip() {
        let cases = vec![
            (json!("abc"), RequestId::String("abc".to_string())),
            (json!(7), RequestId::Number(7)),
            (json!(null), RequestId::Null),
        ];
        for (raw, expected) in cases {
            let id: RequestId = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(id, expected);
            assert_eq!(serde_json::to_value(&id).unwrap(), raw);
        }
    }

    #[test]
    fn test_error_code_wire_format() {
        let code = serde_json::to_value(ErrorCode::InvalidParams).unwrap();
        assert_eq!(code, json!("E_INVALID_PARAMS"));
        assert_eq!(ErrorCode::Auth.as_str(), "E_AUTH");
    }

    #[test]
    fn test_response_shape() {
        let ok = Response::ok(RequestId::Number(1), json!({"ok": true}));
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(v["result"]["ok"], json!(true));

        let err = Response::err(RequestId::Number(2), ErrorCode::NotFound, "missing", None);
        let v = serde_json::to_value(&err).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], json!("E_NOT_FOUND"));
    }

    #[test]
    fn test_is_request() {
        assert!(is_request(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "bridge.ping", "params": {}
        })));
        assert!(!is_request(&json!({"jsonrpc": "2.0", "method": "x"})));
        assert!(!is_request(&json!({"id": 1, "method": "x"})));
        assert!(!is_request(&json!("nope")));
    }

    #[test]
    fn test_method_list_contains_core_surface() {
        for m in ["tx.begin", "tx.commit", "events.subscribe", "agent.planAndExecute"] {
            assert!(METHODS.contains(&m), "missing {}", m);
        }
    }
}
