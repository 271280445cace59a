//! Trace Ring Buffer - bounded operational history
//!
//! Independent of the event bus on purpose: trace items carry request and
//! response detail that must never be broadcast to other connections. The
//! most recent item matching a predicate can be updated in place, which the
//! orchestration policy uses to flip a "pending" step to its final status
//! without duplicating the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What kind of operation a trace item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    Rpc,
    Event,
    AgentStep,
    Tx,
    Diagnostics,
}

/// Outcome of a traced step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Pending,
    Success,
    Error,
}

/// One audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceItem {
    pub timestamp: DateTime<Utc>,
    pub kind: TraceKind,
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub detail: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TraceStatus>,
}

impl TraceItem {
    pub fn new(kind: TraceKind, name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            name: name.into(),
            summary: summary.into(),
            detail: Value::Null,
            status: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_status(mut self, status: TraceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Fixed-capacity append-only trace log, oldest evicted first.
pub struct TraceBuffer {
    items: Mutex<VecDeque<TraceItem>>,
    capacity: usize,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append an item, evicting the oldest once capacity is exceeded.
    pub fn push(&self, item: TraceItem) {
        let mut items = self.items.lock().expect("trace buffer lock poisoned");
        items.push_back(item);
        while items.len() > self.capacity {
            items.pop_front();
        }
    }

    /// Snapshot of the buffer, oldest first.
    pub fn list(&self) -> Vec<TraceItem> {
        let items = self.items.lock().expect("trace buffer lock poisoned");
        items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("trace buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update the most recent item matching `predicate` in place.
    ///
    /// Positions of other items are untouched. Returns false when nothing
    /// matched (the item may already have been evicted).
    pub fn update_last<P, F>(&self, predicate: P, update: F) -> bool
    where
        P: Fn(&TraceItem) -> bool,
        F: FnOnce(&mut TraceItem),
    {
        let mut items = self.items.lock().expect("trace buffer lock poisoned");
        for item in items.iter_mut().rev() {
            if predicate(item) {
                update(item);
                return true;
            }
        }
        false
    }
}
