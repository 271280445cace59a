//! Workspace snapshots
//!
//! Git-backed whole-workspace safety points. A snapshot is a stash commit
//! created without touching the working tree; restore checks that commit's
//! tree back out over the workspace and requires explicit confirmation.

use crate::{Error, Result};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub id: String,
    pub label: String,
    /// How the snapshot was taken.
    pub mechanism: &'static str,
    /// Where the snapshot commit is reachable from.
    pub reference: String,
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(Error::failed_with(
                format!("git {} failed", args.first().copied().unwrap_or("")),
                json!({ "stderr": stderr }),
            ))
        }
    }

    /// Record the current working tree as a stash commit without modifying
    /// it. A clean tree snapshots as the current HEAD commit.
    pub async fn create(&self, label: &str) -> Result<SnapshotInfo> {
        let sha = self.run_git(&["stash", "create", label]).await?;
        let (id, reference) = if sha.is_empty() {
            // Nothing to stash; HEAD already captures the tree.
            (self.run_git(&["rev-parse", "HEAD"]).await?, "HEAD".to_string())
        } else {
            // Keep the dangling stash commit reachable so gc cannot drop it.
            self.run_git(&["stash", "store", "-m", label, &sha]).await?;
            (sha, "refs/stash".to_string())
        };
        info!(snapshot = %id, label, "Workspace snapshot created");
        Ok(SnapshotInfo {
            id,
            label: label.to_string(),
            mechanism: "git-stash",
            reference,
        })
    }

    /// Overwrite tracked files with the snapshot's tree. Unsaved editor
    /// state and untracked files are not touched, which is why the caller
    /// must pass `confirm`.
    pub async fn restore(&self, snapshot_id: &str, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(Error::InvalidParams(
                "Restoring a snapshot overwrites the working tree; pass confirmDestructive: true"
                    .to_string(),
            ));
        }
        // Reject ids that are not commits before touching the tree.
        let kind = self
            .run_git(&["cat-file", "-t", snapshot_id])
            .await
            .map_err(|_| {
                Error::not_found_with("Unknown snapshot", json!({ "snapshotId": snapshot_id }))
            })?;
        if kind != "commit" {
            return Err(Error::not_found_with(
                "Unknown snapshot",
                json!({ "snapshotId": snapshot_id }),
            ));
        }

        warn!(snapshot = %snapshot_id, "Restoring workspace snapshot");
        self.run_git(&["checkout", snapshot_id, "--", "."]).await?;
        Ok(())
    }
}
