//! Method handlers
//!
//! One async function per wire method, routed by [`Gateway::dispatch`].
//! Handlers validate parameters and policy before any side effect, then
//! translate host results into wire-shaped JSON.

use super::params::{self, parse};
use super::{ConnectionId, Gateway, LIMITATIONS};
use crate::host::{HostEvent, WorkspaceEdits};
use crate::trace::{TraceItem, TraceKind, TraceStatus};
use crate::tx::edits::apply_edits;
use crate::{Error, Result};
use bridge_protocol::{EVENTS, METHODS, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;

impl Gateway {
    pub(super) async fn dispatch(
        &self,
        connection: ConnectionId,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        match method {
            "bridge.ping" => Ok(json!({"ok": true, "protocol": PROTOCOL_VERSION})),
            "bridge.capabilities" => Ok(json!({
                "methods": METHODS,
                "events": EVENTS,
                "limitations": LIMITATIONS,
            })),
            "workspace.info" => {
                let info = self.host.workspace_info().await?;
                Ok(serde_json::to_value(info)?)
            }

            "events.subscribe" => self.handle_subscribe(connection, params),
            "events.unsubscribe" => {
                let p: params::UnsubscribeParams = parse(params)?;
                let removed = self.events.unsubscribe(connection, &p.subscription_id)?;
                Ok(json!({"removed": removed}))
            }

            "diagnostics.list" => {
                let p: params::DiagnosticsParams = parse(params)?;
                let items = self.host.diagnostics(p.uri.as_deref()).await?;
                Ok(json!({"items": items}))
            }
            "doc.read" => {
                let p: params::UriParams = parse(params)?;
                let doc = self.host.open_document(&p.uri).await?;
                Ok(json!({
                    "uri": doc.uri,
                    "version": doc.version,
                    "languageId": doc.language_id,
                    "text": doc.text,
                }))
            }
            "doc.applyEdits" => self.handle_apply_edits(params).await,
            "doc.format" => {
                let p: params::UriParams = parse(params)?;
                let edits = self.host.format_document(&p.uri).await?;
                if edits.is_empty() {
                    return Ok(json!({"applied": false, "editCount": 0}));
                }
                let doc = self.host.open_document(&p.uri).await?;
                let formatted = apply_edits(&doc.text, &edits)?;
                self.host.replace_document(&p.uri, &formatted).await?;
                Ok(json!({"applied": true, "editCount": edits.len()}))
            }

            "tasks.list" => {
                let tasks = self.host.tasks().await?;
                Ok(json!({"tasks": tasks}))
            }
            "tasks.run" => {
                let p: params::RunTaskParams = parse(params)?;
                let task_id = self.host.run_task(&p.name).await?;
                Ok(json!({"taskId": task_id}))
            }
            "tasks.terminate" => {
                let p: params::TaskIdParams = parse(params)?;
                let terminated = self.host.terminate_task(&p.task_id).await?;
                Ok(json!({"terminated": terminated}))
            }
            "tasks.awaitExit" => {
                let p: params::AwaitExitParams = parse(params)?;
                self.await_task_exit(&p.task_id, p.timeout_ms).await
            }

            "command.execute" => {
                let p: params::ExecuteCommandParams = parse(params)?;
                self.check_command(&p.command)?;
                let result = self.host.execute_command(&p.command, &p.args).await?;
                Ok(json!({"result": result}))
            }

            "refactor.codeActions" => {
                let p: params::CodeActionsParams = parse(params)?;
                let actions = self
                    .host
                    .code_actions(&p.uri, Some(p.range), p.kind.as_deref())
                    .await?;
                for action in &actions {
                    self.claim_action(&action.id, connection);
                }
                Ok(json!({"actions": actions}))
            }
            "refactor.codeActions.apply" => self.handle_apply_action(connection, params).await,
            "refactor.rename" => {
                let p: params::RenameParams = parse(params)?;
                let edits = self.host.rename(&p.uri, p.position, &p.new_name).await?;
                if edits.is_empty() {
                    return Err(Error::Unsupported(
                        "Rename produced no edits for this target".to_string(),
                    ));
                }
                self.apply_workspace_edits(&edits).await?;
                Ok(json!({"applied": true}))
            }
            "refactor.organizeImports" => {
                let p: params::UriParams = parse(params)?;
                let edits = self.host.organize_imports(&p.uri).await?;
                if edits.is_empty() {
                    return Ok(json!({"applied": false, "editCount": 0}));
                }
                let doc = self.host.open_document(&p.uri).await?;
                let organized = apply_edits(&doc.text, &edits)?;
                self.host.replace_document(&p.uri, &organized).await?;
                Ok(json!({"applied": true, "editCount": edits.len()}))
            }

            "debug.sessions" => {
                let sessions = self.host.debug_sessions().await?;
                Ok(json!({
                    "sessions": sessions.sessions,
                    "activeSession": sessions.active,
                }))
            }
            "debug.start" => {
                let p: params::StartDebugParams = parse(params)?;
                self.host.start_debug(&p.configuration).await?;
                Ok(json!({"started": true}))
            }
            "debug.stop" => self.handle_stop_debug(params).await,
            "debug.awaitTermination" => {
                let p: params::AwaitTerminationParams = parse(params)?;
                self.await_debug_termination(&p.session_id, p.timeout_ms).await
            }

            "tx.begin" => {
                let tx_id = self.transactions.begin();
                Ok(json!({"txId": tx_id.0}))
            }
            "tx.stageEdits" => {
                let p: params::StageEditsParams = parse(params)?;
                let live = self.host.open_document(&p.uri).await?;
                let edit_count = self.transactions.stage_edits(&p.tx_id, &live, &p.edits)?;
                Ok(json!({"staged": true, "editCount": edit_count}))
            }
            "tx.stageRename" => {
                let p: params::StageRenameParams = parse(params)?;
                let edits = self.host.rename(&p.uri, p.position, &p.new_name).await?;
                if edits.is_empty() {
                    return Err(Error::Unsupported(
                        "Rename produced no edits for this target".to_string(),
                    ));
                }
                let file_count = self.stage_workspace_edits(&p.tx_id, &edits).await?;
                Ok(json!({"staged": true, "fileCount": file_count}))
            }
            "tx.stageFix" => {
                let p: params::StageFixParams = parse(params)?;
                match self.first_quick_fix(&p.uri).await? {
                    Some((title, edits)) => {
                        self.stage_workspace_edits(&p.tx_id, &edits).await?;
                        Ok(json!({"staged": true, "title": title}))
                    }
                    None => Ok(json!({"staged": false})),
                }
            }
            "tx.preview" => {
                let p: params::TxParams = parse(params)?;
                let preview = self.transactions.preview(&p.tx_id)?;
                Ok(serde_json::to_value(preview)?)
            }
            "tx.commit" => {
                let p: params::TxParams = parse(params)?;
                let outcome = self.transactions.commit(&p.tx_id, self.host.as_ref()).await;
                self.trace_tx(&p.tx_id, "commit", outcome.as_ref().err());
                let outcome = outcome?;
                Ok(json!({"committed": true, "fileCount": outcome.file_count}))
            }
            "tx.rollback" => {
                let p: params::TxParams = parse(params)?;
                let existed = self.transactions.rollback(&p.tx_id);
                self.trace_tx(&p.tx_id, "rollback", None);
                Ok(json!({"rolledBack": true, "existed": existed}))
            }

            "tx.snapshot.create" => {
                let p: params::SnapshotCreateParams = parse(params)?;
                let label = p.label.as_deref().unwrap_or("bridge-snapshot");
                let snapshot = self.snapshots.create(label).await?;
                Ok(json!({
                    "snapshotId": snapshot.id,
                    "mechanism": snapshot.mechanism,
                    "reference": snapshot.reference,
                }))
            }
            "tx.snapshot.restore" => {
                let p: params::SnapshotRestoreParams = parse(params)?;
                self.snapshots
                    .restore(&p.snapshot_id, p.confirm_destructive)
                    .await?;
                Ok(json!({"restored": true}))
            }

            "agent.planAndExecute" => {
                let p: params::PlanAndExecuteParams = parse(params)?;
                self.plan_and_execute(p.dry_run).await
            }

            _ => Err(Error::not_found_with(
                format!("Unknown method: {method}"),
                json!({"method": method}),
            )),
        }
    }

    // ========================================================================
    // Handlers with more than a few lines
    // ========================================================================

    fn handle_subscribe(&self, connection: ConnectionId, params: Value) -> Result<Value> {
        let p: params::SubscribeParams = parse(params)?;
        if let Some(names) = &p.names {
            for name in names {
                if !EVENTS.contains(&name.as_str()) {
                    return Err(Error::InvalidParams(format!("Unknown event name: {name}")));
                }
            }
        }
        // Replays are queued by the hub before the subscription can see
        // live emits, so the connection's stream stays in seq order.
        let subscription_id = self
            .events
            .subscribe(connection, p.names, p.replay, |delivery| {
                self.deliver_one(&delivery)
            });
        Ok(json!({"subscriptionId": subscription_id}))
    }

    async fn handle_apply_edits(&self, params: Value) -> Result<Value> {
        let p: params::ApplyEditsParams = parse(params)?;
        let doc = self.host.open_document(&p.uri).await?;
        if let Some(expected) = p.expected_version {
            if doc.version != expected {
                return Err(Error::failed_with(
                    "Document version mismatch",
                    json!({"expectedVersion": expected, "actualVersion": doc.version}),
                ));
            }
        }
        let new_text = apply_edits(&doc.text, &p.edits)?;
        let applied = self.host.replace_document(&p.uri, &new_text).await?;
        let after = self.host.open_document(&p.uri).await?;
        Ok(json!({"applied": applied, "newVersion": after.version}))
    }

    async fn handle_apply_action(&self, connection: ConnectionId, params: Value) -> Result<Value> {
        let p: params::ApplyActionParams = parse(params)?;
        self.take_action(&p.action_id, connection)?;
        let resolved = self.host.resolve_code_action(&p.action_id).await?;

        // Policy check on the command portion happens before either side
        // effect, so a denied command applies no edits.
        if let Some(invocation) = &resolved.command {
            self.check_command(&invocation.command)?;
        }

        let edit_applied = if resolved.edits.is_empty() {
            false
        } else {
            self.apply_workspace_edits(&resolved.edits).await?;
            true
        };
        let command_executed = match &resolved.command {
            Some(invocation) => {
                self.host
                    .execute_command(&invocation.command, &invocation.args)
                    .await?;
                true
            }
            None => false,
        };
        Ok(json!({
            "applied": true,
            "editApplied": edit_applied,
            "commandExecuted": command_executed,
        }))
    }

    async fn handle_stop_debug(&self, params: Value) -> Result<Value> {
        let p: params::StopDebugParams = parse(params)?;
        let session_id = match p.session_id {
            Some(id) => id,
            None => {
                let sessions = self.host.debug_sessions().await?;
                sessions
                    .active
                    .map(|s| s.id)
                    .ok_or_else(|| Error::not_found("No active debug session"))?
            }
        };
        if !self.host.stop_debug(&session_id).await? {
            return Err(Error::not_found_with(
                "Unknown debug session",
                json!({"sessionId": session_id}),
            ));
        }
        Ok(json!({"stopped": true}))
    }

    /// Wait for a `tasks.exit` matching `task_id`, bounded by the caller's
    /// timeout. The waiter is just a broadcast receiver; dropping it on
    /// timeout removes it, so it can never fire against a reused id.
    async fn await_task_exit(&self, task_id: &str, timeout_ms: u64) -> Result<Value> {
        let mut receiver = self.host.subscribe_events();
        let wait = async move {
            loop {
                match receiver.recv().await {
                    Ok(HostEvent::TaskExit {
                        execution_id,
                        exit_code,
                        ..
                    }) if execution_id == task_id => break Some(exit_code),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break None,
                }
            }
        };
        match tokio::time::timeout(Duration::from_millis(timeout_ms), wait).await {
            Ok(Some(exit_code)) => Ok(json!({"observed": true, "exitCode": exit_code})),
            _ => Ok(json!({"observed": false})),
        }
    }

    async fn await_debug_termination(&self, session_id: &str, timeout_ms: u64) -> Result<Value> {
        let mut receiver = self.host.subscribe_events();
        let wait = async move {
            loop {
                match receiver.recv().await {
                    Ok(HostEvent::DebugSessionTerminated { id, .. }) if id == session_id => {
                        break true
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break false,
                }
            }
        };
        let observed = tokio::time::timeout(Duration::from_millis(timeout_ms), wait)
            .await
            .unwrap_or(false);
        Ok(json!({"observed": observed}))
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Apply a multi-document edit set directly, one full replacement per
    /// document, in URI order.
    pub(crate) async fn apply_workspace_edits(&self, edits: &WorkspaceEdits) -> Result<usize> {
        let mut uris: Vec<&String> = edits.changes.keys().collect();
        uris.sort();
        for uri in &uris {
            let doc = self.host.open_document(uri).await?;
            let new_text = apply_edits(&doc.text, &edits.changes[*uri])?;
            self.host.replace_document(uri, &new_text).await?;
        }
        Ok(uris.len())
    }

    /// Stage a multi-document edit set into a transaction against each
    /// document's current snapshot.
    pub(crate) async fn stage_workspace_edits(
        &self,
        tx_id: &str,
        edits: &WorkspaceEdits,
    ) -> Result<usize> {
        let mut docs = Vec::with_capacity(edits.changes.len());
        for (uri, edit_list) in &edits.changes {
            let live = self.host.open_document(uri).await?;
            docs.push((live, edit_list.clone()));
        }
        docs.sort_by(|a, b| a.0.uri.cmp(&b.0.uri));
        self.transactions.stage_workspace_edits(tx_id, &docs)
    }

    /// First quick fix carrying an edit for the document's first
    /// diagnostic, resolved to its edit set.
    pub(crate) async fn first_quick_fix(
        &self,
        uri: &str,
    ) -> Result<Option<(String, WorkspaceEdits)>> {
        let files = self.host.diagnostics(Some(uri)).await?;
        let Some(diagnostic) = files.first().and_then(|f| f.diagnostics.first()) else {
            return Ok(None);
        };
        let actions = self
            .host
            .code_actions(uri, Some(diagnostic.range), Some("quickfix"))
            .await?;
        for action in actions {
            if !action.has_edit {
                continue;
            }
            let resolved = self.host.resolve_code_action(&action.id).await?;
            if !resolved.edits.is_empty() {
                return Ok(Some((action.title, resolved.edits)));
            }
        }
        Ok(None)
    }

    fn trace_tx(&self, tx_id: &str, operation: &str, error: Option<&Error>) {
        let status = if error.is_some() {
            TraceStatus::Error
        } else {
            TraceStatus::Success
        };
        let mut item = TraceItem::new(TraceKind::Tx, format!("tx.{operation}"), tx_id.to_string())
            .with_status(status);
        if let Some(err) = error {
            item = item.with_detail(json!({"error": err.to_string()}));
        }
        self.traces.push(item);
    }
}
