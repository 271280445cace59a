//! Orchestration policy
//!
//! `agent.planAndExecute` is a fixed two-phase state machine, not a
//! general planner. Plan: open a transaction and, if the workspace has
//! diagnostics, stage the first quick fix for the first affected
//! document. Decide: dry runs roll back and report the preview; real runs
//! commit, and a failed commit is surfaced with no transaction left
//! behind.

use crate::gateway::Gateway;
use crate::trace::{TraceItem, TraceKind, TraceStatus};
use crate::Result;
use serde_json::{json, Value};
use tracing::info;

impl Gateway {
    pub(crate) async fn plan_and_execute(&self, dry_run: bool) -> Result<Value> {
        let diagnostics_before = self.count_diagnostics().await?;
        let tx_id = self.transactions.begin().0;

        // Plan: stage at most one quick fix.
        let staged = if diagnostics_before > 0 {
            let first_uri = self
                .host()
                .diagnostics(None)
                .await?
                .into_iter()
                .next()
                .map(|f| f.uri);
            match first_uri {
                Some(uri) => match self.first_quick_fix(&uri).await? {
                    Some((title, edits)) => {
                        self.stage_workspace_edits(&tx_id, &edits).await?;
                        Some(title)
                    }
                    None => None,
                },
                None => None,
            }
        } else {
            None
        };

        self.traces.push(
            TraceItem::new(
                TraceKind::AgentStep,
                "plan",
                staged.as_deref().unwrap_or("nothing to stage").to_string(),
            )
            .with_detail(json!({"txId": tx_id, "diagnosticsBefore": diagnostics_before}))
            .with_status(TraceStatus::Success),
        );

        let preview = self.transactions.preview(&tx_id)?;
        // Staged edits are not applied yet, so this delta only reflects
        // same-tick side effects.
        let diagnostics_after = self.count_diagnostics().await?;

        if dry_run {
            self.transactions.rollback(&tx_id);
            self.traces.push(
                TraceItem::new(TraceKind::AgentStep, "decide", "dry run, rolled back")
                    .with_status(TraceStatus::Success),
            );
            return Ok(json!({
                "dryRun": true,
                "preview": preview,
                "rolledBack": true,
            }));
        }

        match self.transactions.commit(&tx_id, self.host()).await {
            Ok(outcome) => {
                info!(tx_id = %tx_id, files = outcome.file_count, "Orchestration committed");
                self.traces.push(
                    TraceItem::new(TraceKind::AgentStep, "decide", "committed")
                        .with_status(TraceStatus::Success),
                );
                Ok(json!({
                    "committed": true,
                    "fileCount": outcome.file_count,
                    "diagnosticsBefore": diagnostics_before,
                    "diagnosticsAfter": diagnostics_after,
                }))
            }
            Err(err) => {
                // Surface the failure, but never leave the transaction
                // dangling.
                self.transactions.rollback(&tx_id);
                self.traces.push(
                    TraceItem::new(TraceKind::AgentStep, "decide", "commit failed")
                        .with_detail(json!({"error": err.to_string()}))
                        .with_status(TraceStatus::Error),
                );
                Err(err)
            }
        }
    }

    async fn count_diagnostics(&self) -> Result<usize> {
        let files = self.host().diagnostics(None).await?;
        Ok(files.iter().map(|f| f.diagnostics.len()).sum())
    }
}
