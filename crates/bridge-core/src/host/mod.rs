//! Editor host abstraction
//!
//! Everything the gateway knows about the editor goes through [`EditorHost`].
//! The in-memory implementation in [`memory`] backs the standalone server
//! and the test suite; an embedding editor provides its own.

pub mod memory;

use crate::Result;
use async_trait::async_trait;
use bridge_protocol::{Diagnostic, TextEdit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

// ============================================================================
// Host Data Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFolder {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub name: String,
    pub folders: Vec<WorkspaceFolder>,
}

/// Point-in-time view of an open document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub uri: String,
    pub language_id: String,
    pub version: i64,
    pub text: String,
    pub dirty: bool,
    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiagnostics {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub name: String,
    pub source: String,
    pub kind: String,
}

/// A resolvable code action offered at some location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeActionInfo {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub has_edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
}

/// A code action's concrete effect once resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCodeAction {
    pub edits: WorkspaceEdits,
    pub command: Option<CommandInvocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Edits spanning one or more documents, keyed by URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceEdits {
    pub changes: HashMap<String, Vec<TextEdit>>,
}

impl WorkspaceEdits {
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(|edits| edits.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSessionInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub session_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct DebugSessions {
    pub sessions: Vec<DebugSessionInfo>,
    pub active: Option<DebugSessionInfo>,
}

// ============================================================================
// Host Events
// ============================================================================

/// Push notifications originating in the editor, fanned out to the event
/// hub by the gateway's event pump.
#[derive(Debug, Clone)]
pub enum HostEvent {
    DiagnosticsChanged { uris: Vec<String> },
    TaskExit {
        execution_id: String,
        name: String,
        exit_code: Option<i32>,
    },
    DebugSessionStarted { session: DebugSessionInfo },
    DebugSessionTerminated { id: String, name: String },
}

impl HostEvent {
    /// Wire-level event name, as carried in subscriptions and deliveries.
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::DiagnosticsChanged { .. } => "diagnostics.changed",
            HostEvent::TaskExit { .. } => "tasks.exit",
            HostEvent::DebugSessionStarted { .. } => "debug.sessionStarted",
            HostEvent::DebugSessionTerminated { .. } => "debug.sessionTerminated",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            HostEvent::DiagnosticsChanged { uris } => serde_json::json!({ "uris": uris }),
            HostEvent::TaskExit {
                execution_id,
                name,
                exit_code,
            } => serde_json::json!({
                "taskId": execution_id,
                "name": name,
                "exitCode": exit_code,
            }),
            HostEvent::DebugSessionStarted { session } => {
                serde_json::json!({ "session": session })
            }
            HostEvent::DebugSessionTerminated { id, name } => {
                serde_json::json!({ "id": id, "name": name })
            }
        }
    }
}

// ============================================================================
// EditorHost Trait
// ============================================================================

/// The seam between the gateway and the editor it fronts.
///
/// Implementations must be cheap to call concurrently; document reads and
/// writes are expected to be linearizable per URI so version numbers form
/// a usable optimistic-concurrency token.
#[async_trait]
pub trait EditorHost: Send + Sync {
    // ---- Workspace ----
    async fn workspace_info(&self) -> Result<WorkspaceInfo>;

    /// Current diagnostics, optionally narrowed to one URI.
    async fn diagnostics(&self, uri: Option<&str>) -> Result<Vec<FileDiagnostics>>;

    // ---- Documents ----
    async fn open_document(&self, uri: &str) -> Result<DocumentSnapshot>;

    /// Replace a document's full text, bumping its version. Returns false
    /// if the editor declined the write.
    async fn replace_document(&self, uri: &str, text: &str) -> Result<bool>;

    /// Ask the editor's formatter for edits. Empty when already formatted.
    async fn format_document(&self, uri: &str) -> Result<Vec<TextEdit>>;

    // ---- Tasks ----
    async fn tasks(&self) -> Result<Vec<TaskInfo>>;

    /// Start a named task; returns the execution identifier later reported
    /// in `tasks.exit`.
    async fn run_task(&self, name: &str) -> Result<String>;

    async fn terminate_task(&self, execution_id: &str) -> Result<bool>;

    // ---- Commands ----
    async fn execute_command(&self, command: &str, args: &[Value]) -> Result<Value>;

    // ---- Language features ----
    async fn code_actions(
        &self,
        uri: &str,
        range: Option<bridge_protocol::Range>,
        kind: Option<&str>,
    ) -> Result<Vec<CodeActionInfo>>;

    /// Resolve a previously listed action into its edit set and optional
    /// follow-up command.
    async fn resolve_code_action(&self, action_id: &str) -> Result<ResolvedCodeAction>;

    async fn rename(
        &self,
        uri: &str,
        position: bridge_protocol::Position,
        new_name: &str,
    ) -> Result<WorkspaceEdits>;

    async fn organize_imports(&self, uri: &str) -> Result<Vec<TextEdit>>;

    // ---- Debug ----
    async fn debug_sessions(&self) -> Result<DebugSessions>;

    async fn start_debug(&self, name: &str) -> Result<DebugSessionInfo>;

    async fn stop_debug(&self, session_id: &str) -> Result<bool>;

    // ---- Events ----
    /// Subscribe to the host's push notifications. Each call returns an
    /// independent receiver.
    fn subscribe_events(&self) -> broadcast::Receiver<HostEvent>;
}
