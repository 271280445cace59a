//! In-memory editor host
//!
//! A self-contained [`EditorHost`] backing the standalone server binary and
//! the test suite. Documents, diagnostics, tasks and debug sessions live in
//! maps; the seeding methods (`insert_document`, `set_diagnostics`, ...)
//! stand in for the editor-side activity a real embedding would produce.

use super::{
    CodeActionInfo, CommandInvocation, DebugSessionInfo, DebugSessions, DocumentSnapshot,
    EditorHost, FileDiagnostics, HostEvent, ResolvedCodeAction, TaskInfo, WorkspaceEdits,
    WorkspaceFolder, WorkspaceInfo,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bridge_protocol::{Diagnostic, Position, Range, TextEdit};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct DocState {
    language_id: String,
    version: i64,
    text: String,
    dirty: bool,
}

struct RunningTask {
    execution_id: String,
    name: String,
}

#[derive(Default)]
struct HostState {
    documents: HashMap<String, DocState>,
    diagnostics: HashMap<String, Vec<Diagnostic>>,
    tasks: Vec<TaskInfo>,
    running_tasks: Vec<RunningTask>,
    commands: HashMap<String, Value>,
    code_actions: HashMap<String, (String, CodeActionInfo, ResolvedCodeAction)>,
    debug_sessions: HashMap<String, DebugSessionInfo>,
    active_debug: Option<String>,
    workspace_name: String,
    folders: Vec<WorkspaceFolder>,
}

pub struct MemoryHost {
    state: RwLock<HostState>,
    events: broadcast::Sender<HostEvent>,
}

impl MemoryHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(HostState {
                workspace_name: "workspace".to_string(),
                folders: vec![WorkspaceFolder {
                    name: "workspace".to_string(),
                    uri: "file:///workspace".to_string(),
                }],
                ..Default::default()
            }),
            events,
        }
    }

    fn emit(&self, event: HostEvent) {
        // No receivers is fine; lagging receivers drop the oldest entries.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Seeding / simulation surface
    // ========================================================================

    pub async fn set_workspace(&self, name: &str, folders: Vec<WorkspaceFolder>) {
        let mut state = self.state.write().await;
        state.workspace_name = name.to_string();
        state.folders = folders;
    }

    pub async fn insert_document(&self, uri: &str, language_id: &str, text: &str) {
        let mut state = self.state.write().await;
        state.documents.insert(
            uri.to_string(),
            DocState {
                language_id: language_id.to_string(),
                version: 1,
                text: text.to_string(),
                dirty: false,
            },
        );
    }

    pub async fn set_diagnostics(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        {
            let mut state = self.state.write().await;
            if diagnostics.is_empty() {
                state.diagnostics.remove(uri);
            } else {
                state.diagnostics.insert(uri.to_string(), diagnostics);
            }
        }
        self.emit(HostEvent::DiagnosticsChanged {
            uris: vec![uri.to_string()],
        });
    }

    pub async fn add_task(&self, name: &str, kind: &str) {
        let mut state = self.state.write().await;
        state.tasks.push(TaskInfo {
            name: name.to_string(),
            source: "workspace".to_string(),
            kind: kind.to_string(),
        });
    }

    /// Simulate a running task finishing with the given exit code.
    pub async fn finish_task(&self, execution_id: &str, exit_code: i32) -> bool {
        let name = {
            let mut state = self.state.write().await;
            match state
                .running_tasks
                .iter()
                .position(|t| t.execution_id == execution_id)
            {
                Some(idx) => state.running_tasks.remove(idx).name,
                None => return false,
            }
        };
        self.emit(HostEvent::TaskExit {
            execution_id: execution_id.to_string(),
            name,
            exit_code: Some(exit_code),
        });
        true
    }

    pub async fn register_command(&self, command: &str, result: Value) {
        let mut state = self.state.write().await;
        state.commands.insert(command.to_string(), result);
    }

    pub async fn register_code_action(
        &self,
        uri: &str,
        title: &str,
        kind: Option<&str>,
        edits: WorkspaceEdits,
        command: Option<CommandInvocation>,
    ) -> String {
        let action = CodeActionInfo {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            kind: kind.map(str::to_string),
            has_edit: !edits.is_empty(),
            command_id: command.as_ref().map(|c| c.command.clone()),
        };
        let id = action.id.clone();
        let mut state = self.state.write().await;
        state.code_actions.insert(
            id.clone(),
            (
                uri.to_string(),
                action,
                ResolvedCodeAction { edits, command },
            ),
        );
        id
    }

    // ========================================================================
    // Rename support
    // ========================================================================

    fn word_at(text: &str, position: Position) -> Option<String> {
        let line = text.lines().nth(position.line as usize)?;
        let chars: Vec<char> = line.chars().collect();
        let col = (position.character as usize).min(chars.len());
        let is_word = |c: char| c.is_alphanumeric() || c == '_';

        let mut start = col;
        while start > 0 && is_word(chars[start - 1]) {
            start -= 1;
        }
        let mut end = col;
        while end < chars.len() && is_word(chars[end]) {
            end += 1;
        }
        if start == end {
            return None;
        }
        Some(chars[start..end].iter().collect())
    }

    /// Whole-word occurrences of `word` in `text`, as edits replacing each
    /// occurrence with `new_name`. Positions count Unicode scalar values.
    fn word_edits(text: &str, word: &str, new_name: &str) -> Vec<TextEdit> {
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        let word_chars: Vec<char> = word.chars().collect();
        let mut edits = Vec::new();

        for (line_idx, line) in text.lines().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            let mut col = 0;
            while col + word_chars.len() <= chars.len() {
                let matches = chars[col..col + word_chars.len()] == word_chars[..]
                    && (col == 0 || !is_word(chars[col - 1]))
                    && (col + word_chars.len() == chars.len()
                        || !is_word(chars[col + word_chars.len()]));
                if matches {
                    edits.push(TextEdit {
                        range: Range::new(
                            Position::new(line_idx as u32, col as u32),
                            Position::new(line_idx as u32, (col + word_chars.len()) as u32),
                        ),
                        new_text: new_name.to_string(),
                    });
                    col += word_chars.len();
                } else {
                    col += 1;
                }
            }
        }
        edits
    }

    fn organize_import_edits(text: &str) -> Vec<TextEdit> {
        let lines: Vec<&str> = text.lines().collect();
        let block_len = lines
            .iter()
            .take_while(|line| line.starts_with("use ") || line.starts_with("import "))
            .count();
        if block_len < 2 {
            return Vec::new();
        }
        let mut sorted: Vec<&str> = lines[..block_len].to_vec();
        sorted.sort_unstable();
        if sorted == lines[..block_len] {
            return Vec::new();
        }
        let mut new_text = sorted.join("\n");
        new_text.push('\n');
        vec![TextEdit {
            range: Range::new(Position::new(0, 0), Position::new(block_len as u32, 0)),
            new_text,
        }]
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EditorHost for MemoryHost {
    async fn workspace_info(&self) -> Result<WorkspaceInfo> {
        let state = self.state.read().await;
        Ok(WorkspaceInfo {
            name: state.workspace_name.clone(),
            folders: state.folders.clone(),
        })
    }

    async fn diagnostics(&self, uri: Option<&str>) -> Result<Vec<FileDiagnostics>> {
        let state = self.state.read().await;
        let mut files: Vec<FileDiagnostics> = state
            .diagnostics
            .iter()
            .filter(|(key, _)| uri.map_or(true, |u| u == key.as_str()))
            .map(|(uri, diagnostics)| FileDiagnostics {
                uri: uri.clone(),
                diagnostics: diagnostics.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(files)
    }

    async fn open_document(&self, uri: &str) -> Result<DocumentSnapshot> {
        let state = self.state.read().await;
        let doc = state
            .documents
            .get(uri)
            .ok_or_else(|| Error::not_found_with("Unknown document", json!({ "uri": uri })))?;
        Ok(DocumentSnapshot {
            uri: uri.to_string(),
            language_id: doc.language_id.clone(),
            version: doc.version,
            text: doc.text.clone(),
            dirty: doc.dirty,
            line_count: doc.text.lines().count(),
        })
    }

    async fn replace_document(&self, uri: &str, text: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let doc = state
            .documents
            .get_mut(uri)
            .ok_or_else(|| Error::not_found_with("Unknown document", json!({ "uri": uri })))?;
        doc.text = text.to_string();
        doc.version += 1;
        doc.dirty = true;
        Ok(true)
    }

    async fn format_document(&self, uri: &str) -> Result<Vec<TextEdit>> {
        // Formatting here means trimming trailing whitespace per line.
        let snapshot = self.open_document(uri).await?;
        let mut edits = Vec::new();
        for (line_idx, line) in snapshot.text.lines().enumerate() {
            let trimmed_len = line.trim_end().chars().count();
            let full_len = line.chars().count();
            if trimmed_len < full_len {
                edits.push(TextEdit {
                    range: Range::new(
                        Position::new(line_idx as u32, trimmed_len as u32),
                        Position::new(line_idx as u32, full_len as u32),
                    ),
                    new_text: String::new(),
                });
            }
        }
        Ok(edits)
    }

    async fn tasks(&self) -> Result<Vec<TaskInfo>> {
        let state = self.state.read().await;
        Ok(state.tasks.clone())
    }

    async fn run_task(&self, name: &str) -> Result<String> {
        let mut state = self.state.write().await;
        if !state.tasks.iter().any(|t| t.name == name) {
            return Err(Error::not_found_with(
                "Unknown task",
                json!({ "name": name }),
            ));
        }
        let execution_id = Uuid::new_v4().to_string();
        state.running_tasks.push(RunningTask {
            execution_id: execution_id.clone(),
            name: name.to_string(),
        });
        Ok(execution_id)
    }

    async fn terminate_task(&self, execution_id: &str) -> Result<bool> {
        let name = {
            let mut state = self.state.write().await;
            match state
                .running_tasks
                .iter()
                .position(|t| t.execution_id == execution_id)
            {
                Some(idx) => state.running_tasks.remove(idx).name,
                None => return Ok(false),
            }
        };
        self.emit(HostEvent::TaskExit {
            execution_id: execution_id.to_string(),
            name,
            exit_code: None,
        });
        Ok(true)
    }

    async fn execute_command(&self, command: &str, _args: &[Value]) -> Result<Value> {
        let state = self.state.read().await;
        state.commands.get(command).cloned().ok_or_else(|| {
            Error::not_found_with("Unknown command", json!({ "command": command }))
        })
    }

    async fn code_actions(
        &self,
        uri: &str,
        _range: Option<Range>,
        kind: Option<&str>,
    ) -> Result<Vec<CodeActionInfo>> {
        let state = self.state.read().await;
        let mut actions: Vec<CodeActionInfo> = state
            .code_actions
            .values()
            .filter(|(action_uri, action, _)| {
                action_uri == uri
                    && kind.map_or(true, |k| {
                        action.kind.as_deref().is_some_and(|ak| ak.starts_with(k))
                    })
            })
            .map(|(_, action, _)| action.clone())
            .collect();
        actions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(actions)
    }

    async fn resolve_code_action(&self, action_id: &str) -> Result<ResolvedCodeAction> {
        let state = self.state.read().await;
        state
            .code_actions
            .get(action_id)
            .map(|(_, _, resolved)| resolved.clone())
            .ok_or_else(|| {
                Error::not_found_with("Unknown code action", json!({ "actionId": action_id }))
            })
    }

    async fn rename(
        &self,
        uri: &str,
        position: Position,
        new_name: &str,
    ) -> Result<WorkspaceEdits> {
        let state = self.state.read().await;
        let doc = state
            .documents
            .get(uri)
            .ok_or_else(|| Error::not_found_with("Unknown document", json!({ "uri": uri })))?;
        let word = Self::word_at(&doc.text, position)
            .ok_or_else(|| Error::InvalidParams("No identifier at position".to_string()))?;

        let mut changes = HashMap::new();
        for (doc_uri, doc) in &state.documents {
            let edits = Self::word_edits(&doc.text, &word, new_name);
            if !edits.is_empty() {
                changes.insert(doc_uri.clone(), edits);
            }
        }
        Ok(WorkspaceEdits { changes })
    }

    async fn organize_imports(&self, uri: &str) -> Result<Vec<TextEdit>> {
        let snapshot = self.open_document(uri).await?;
        Ok(Self::organize_import_edits(&snapshot.text))
    }

    async fn debug_sessions(&self) -> Result<DebugSessions> {
        let state = self.state.read().await;
        let mut sessions: Vec<DebugSessionInfo> = state.debug_sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        let active = state
            .active_debug
            .as_ref()
            .and_then(|id| state.debug_sessions.get(id))
            .cloned();
        Ok(DebugSessions { sessions, active })
    }

    async fn start_debug(&self, name: &str) -> Result<DebugSessionInfo> {
        let session = DebugSessionInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            session_type: "mock".to_string(),
        };
        {
            let mut state = self.state.write().await;
            state
                .debug_sessions
                .insert(session.id.clone(), session.clone());
            state.active_debug = Some(session.id.clone());
        }
        self.emit(HostEvent::DebugSessionStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn stop_debug(&self, session_id: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.debug_sessions.remove(session_id);
            if state.active_debug.as_deref() == Some(session_id) {
                state.active_debug = None;
            }
            removed
        };
        match removed {
            Some(session) => {
                self.emit(HostEvent::DebugSessionTerminated {
                    id: session.id,
                    name: session.name,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
