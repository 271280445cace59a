//! Transaction Staging Engine
//!
//! Builds up multi-document edit sets in memory, previews them as unified
//! diffs, and commits them with an optimistic version check: every staged
//! document's live version must still equal the version recorded when it
//! was first staged, or nothing is applied.

pub mod edits;

use crate::host::{DocumentSnapshot, EditorHost};
use crate::{Error, Result};
use bridge_protocol::TextEdit;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

// ============================================================================
// Transaction Types
// ============================================================================

/// Opaque transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TxId(pub String);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One document's base state plus proposed state within a transaction.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    pub uri: String,
    /// Live version at the moment the document was first staged.
    pub base_version: i64,
    pub base_text: String,
    pub proposed_text: String,
    pub edit_count: usize,
}

struct Transaction {
    docs: HashMap<String, StagedDocument>,
}

/// Per-file diff plus the concatenated transaction-wide diff.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub files: Vec<PreviewFile>,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewFile {
    pub uri: String,
    pub diff: String,
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitOutcome {
    pub file_count: usize,
}

// ============================================================================
// Diff rendering
// ============================================================================

/// Unified diff between base and proposed text for one document.
pub fn unified_diff(uri: &str, base: &str, proposed: &str) -> String {
    similar::TextDiff::from_lines(base, proposed)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", uri), &format!("b/{}", uri))
        .to_string()
}

// ============================================================================
// TxEngine
// ============================================================================

/// Holds all in-flight transactions for one gateway instance.
///
/// Staged text is never shared across transactions; the map lock is only
/// held for synchronous map operations, never across an await.
pub struct TxEngine {
    transactions: Mutex<HashMap<String, Transaction>>,
}

impl TxEngine {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh transaction with an empty staged-document map.
    pub fn begin(&self) -> TxId {
        let id = TxId::new();
        let mut txs = self.transactions.lock().expect("tx map lock poisoned");
        txs.insert(
            id.0.clone(),
            Transaction {
                docs: HashMap::new(),
            },
        );
        debug!(tx_id = %id, "Transaction started");
        id
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.transactions
            .lock()
            .expect("tx map lock poisoned")
            .contains_key(tx_id)
    }

    /// Stage an edit list against one document.
    ///
    /// The first stage of a document records its base version and text from
    /// `live`; later stages replace the proposed text (recomputed from the
    /// recorded base text) but keep the original base version, so commit
    /// still detects drift relative to the true pre-transaction state.
    pub fn stage_edits(
        &self,
        tx_id: &str,
        live: &DocumentSnapshot,
        edit_list: &[TextEdit],
    ) -> Result<usize> {
        // Read the base under a short lock, then apply edits with the lock
        // released so a fallible (or expensive) application never touches
        // the shared map.
        let base = {
            let txs = self.transactions.lock().expect("tx map lock poisoned");
            let tx = txs.get(tx_id).ok_or_else(|| {
                Error::not_found_with("Unknown transaction", json!({"txId": tx_id}))
            })?;
            tx.docs
                .get(&live.uri)
                .map(|staged| (staged.base_version, staged.base_text.clone()))
        };

        let (base_version, base_text) = match base {
            Some((version, text)) => (version, text),
            None => (live.version, live.text.clone()),
        };
        let proposed = edits::apply_edits(&base_text, edit_list)?;

        let mut txs = self.transactions.lock().expect("tx map lock poisoned");
        let tx = txs
            .get_mut(tx_id)
            .ok_or_else(|| Error::not_found_with("Unknown transaction", json!({"txId": tx_id})))?;
        tx.docs.insert(
            live.uri.clone(),
            StagedDocument {
                uri: live.uri.clone(),
                base_version,
                base_text,
                proposed_text: proposed,
                edit_count: edit_list.len(),
            },
        );

        debug!(tx_id = %tx_id, uri = %live.uri, edits = edit_list.len(), "Staged edits");
        Ok(edit_list.len())
    }

    /// Stage a provider-produced edit set spanning multiple documents.
    /// Returns the number of documents touched.
    pub fn stage_workspace_edits(
        &self,
        tx_id: &str,
        docs: &[(DocumentSnapshot, Vec<TextEdit>)],
    ) -> Result<usize> {
        for (live, edit_list) in docs {
            self.stage_edits(tx_id, live, edit_list)?;
        }
        Ok(docs.len())
    }

    /// Produce per-document and concatenated diffs. Side-effect free and
    /// idempotent: the same unmodified transaction always yields the same
    /// output.
    pub fn preview(&self, tx_id: &str) -> Result<Preview> {
        let txs = self.transactions.lock().expect("tx map lock poisoned");
        let tx = txs
            .get(tx_id)
            .ok_or_else(|| Error::not_found_with("Unknown transaction", json!({"txId": tx_id})))?;

        let mut uris: Vec<&String> = tx.docs.keys().collect();
        uris.sort();

        let files: Vec<PreviewFile> = uris
            .into_iter()
            .map(|uri| {
                let staged = &tx.docs[uri];
                PreviewFile {
                    uri: uri.clone(),
                    diff: unified_diff(uri, &staged.base_text, &staged.proposed_text),
                }
            })
            .collect();

        let combined = files
            .iter()
            .map(|f| f.diff.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Preview {
            files,
            diff: combined,
        })
    }

    /// Validate every staged document's live version, then apply all staged
    /// documents as full-text replacements and discard the transaction.
    ///
    /// Any version mismatch aborts the whole commit before anything is
    /// applied, reporting each diverged document with both versions.
    /// Versions are checked once up front: an external edit landing between
    /// validation and a later document's apply step is not re-detected.
    pub async fn commit(&self, tx_id: &str, host: &dyn EditorHost) -> Result<CommitOutcome> {
        let staged: Vec<StagedDocument> = {
            let txs = self.transactions.lock().expect("tx map lock poisoned");
            let tx = txs.get(tx_id).ok_or_else(|| {
                Error::not_found_with("Unknown transaction", json!({"txId": tx_id}))
            })?;
            let mut docs: Vec<StagedDocument> = tx.docs.values().cloned().collect();
            docs.sort_by(|a, b| a.uri.cmp(&b.uri));
            docs
        };

        // Phase 1: validate all base versions before applying anything.
        let mut mismatches = Vec::new();
        for doc in &staged {
            let live = host.open_document(&doc.uri).await?;
            if live.version != doc.base_version {
                mismatches.push(json!({
                    "uri": doc.uri,
                    "expectedVersion": doc.base_version,
                    "actualVersion": live.version,
                }));
            }
        }
        if !mismatches.is_empty() {
            info!(tx_id = %tx_id, diverged = mismatches.len(), "Commit aborted on version mismatch");
            return Err(Error::failed_with(
                "Document version mismatch",
                json!({ "mismatches": mismatches }),
            ));
        }

        // Phase 2: apply each staged document as one full replacement.
        for doc in &staged {
            let applied = host.replace_document(&doc.uri, &doc.proposed_text).await?;
            if !applied {
                return Err(Error::failed(format!(
                    "Host refused staged text for {}",
                    doc.uri
                )));
            }
        }

        let file_count = staged.len();
        self.transactions
            .lock()
            .expect("tx map lock poisoned")
            .remove(tx_id);

        info!(tx_id = %tx_id, file_count, "Transaction committed");
        Ok(CommitOutcome { file_count })
    }

    /// Discard a transaction unconditionally. Reports whether it existed.
    pub fn rollback(&self, tx_id: &str) -> bool {
        let existed = self
            .transactions
            .lock()
            .expect("tx map lock poisoned")
            .remove(tx_id)
            .is_some();
        if existed {
            debug!(tx_id = %tx_id, "Transaction rolled back");
        }
        existed
    }
}

impl Default for TxEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
