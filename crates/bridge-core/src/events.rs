//! Event Bus - subscriptions, fanout, and bounded replay
//!
//! Named, payload-bearing notifications delivered to subscribed
//! connections. A shared fixed-capacity ring of recent events backs
//! catch-up replay at subscribe time. Delivery order across subscribers is
//! unspecified; each subscriber sees its matching events in emission order.

use crate::gateway::ConnectionId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// Event Records
// ============================================================================

/// One emitted event, as stored in the ring and delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number across all event names.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub payload: Value,
}

/// One pending delivery produced by `emit` or `subscribe` replay.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub connection: ConnectionId,
    pub subscription_id: String,
    pub record: EventRecord,
}

// ============================================================================
// Subscriptions
// ============================================================================

struct Subscription {
    connection: ConnectionId,
    /// None means "all event names".
    names: Option<HashSet<String>>,
}

impl Subscription {
    fn matches(&self, name: &str) -> bool {
        match &self.names {
            Some(names) => names.contains(name),
            None => true,
        }
    }
}

// ============================================================================
// EventHub
// ============================================================================

struct HubState {
    next_seq: u64,
    ring: VecDeque<EventRecord>,
    subscriptions: HashMap<String, Subscription>,
}

/// The event bus: subscription registry plus replay ring.
///
/// All mutation happens under one lock and never suspends, so concurrent
/// request handlers cannot interleave partial updates.
pub struct EventHub {
    capacity: usize,
    state: Mutex<HubState>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(HubState {
                next_seq: 0,
                ring: VecDeque::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    /// Register a subscription for `connection`.
    ///
    /// `names` empty or omitted subscribes to everything. Up to `replay`
    /// most recent matching events from the ring are passed to `deliver`,
    /// in original emission order, before the subscription becomes visible
    /// to `emit`. That keeps every subscriber's stream in seq order even
    /// when an emit races the subscribe: the sink runs under the hub lock,
    /// so it must enqueue without calling back into the hub.
    pub fn subscribe<F>(
        &self,
        connection: ConnectionId,
        names: Option<Vec<String>>,
        replay: usize,
        mut deliver: F,
    ) -> String
    where
        F: FnMut(Delivery),
    {
        let filter: Option<HashSet<String>> = match names {
            Some(list) if !list.is_empty() => Some(list.into_iter().collect()),
            _ => None,
        };

        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().expect("event hub lock poisoned");

        let subscription = Subscription {
            connection,
            names: filter,
        };

        let mut replayed = 0usize;
        if replay > 0 {
            let matching: Vec<&EventRecord> = state
                .ring
                .iter()
                .filter(|r| subscription.matches(&r.name))
                .collect();
            let take = replay.min(self.capacity).min(matching.len());
            for record in &matching[matching.len() - take..] {
                deliver(Delivery {
                    connection,
                    subscription_id: id.clone(),
                    record: (*record).clone(),
                });
                replayed += 1;
            }
        }

        debug!(subscription_id = %id, connection = %connection, replayed, "Subscription registered");
        state.subscriptions.insert(id.clone(), subscription);

        id
    }

    /// Remove a subscription. Only the owning connection may remove it.
    ///
    /// Unknown ids report `removed: false` rather than an error, so
    /// unsubscribe after disconnect-sweep stays idempotent.
    pub fn unsubscribe(&self, connection: ConnectionId, id: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("event hub lock poisoned");

        match state.subscriptions.get(id) {
            None => Ok(false),
            Some(sub) if sub.connection != connection => Err(Error::permission(
                "Subscription is owned by another connection",
            )),
            Some(_) => {
                state.subscriptions.remove(id);
                Ok(true)
            }
        }
    }

    /// Drop every subscription owned by `connection`.
    pub fn remove_connection(&self, connection: ConnectionId) {
        let mut state = self.state.lock().expect("event hub lock poisoned");
        state
            .subscriptions
            .retain(|_, sub| sub.connection != connection);
    }

    /// Record an event and compute the deliveries it produces.
    ///
    /// The record is appended to the ring (oldest evicted first) and one
    /// delivery is produced per matching subscription.
    pub fn emit(&self, name: impl Into<String>, payload: Value) -> (EventRecord, Vec<Delivery>) {
        let name = name.into();
        let mut state = self.state.lock().expect("event hub lock poisoned");

        let record = EventRecord {
            seq: state.next_seq,
            timestamp: Utc::now(),
            name: name.clone(),
            payload,
        };
        state.next_seq += 1;

        state.ring.push_back(record.clone());
        while state.ring.len() > self.capacity {
            state.ring.pop_front();
        }

        let deliveries: Vec<Delivery> = state
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.matches(&name))
            .map(|(id, sub)| Delivery {
                connection: sub.connection,
                subscription_id: id.clone(),
                record: record.clone(),
            })
            .collect();

        (record, deliveries)
    }

    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .expect("event hub lock poisoned")
            .subscriptions
            .len()
    }
}

// ============================================================================
// Tests
// ============================================================================
