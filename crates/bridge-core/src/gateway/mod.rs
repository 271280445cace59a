//! Bridge Gateway
//!
//! The single dispatch point between connections and everything behind
//! them: authentication, parameter parsing, the method table, per-request
//! tracing, and fan-out of host events to subscribers. All mutable
//! registries live on the gateway instance so several gateways can coexist
//! in one process.

mod handlers;
mod params;

use crate::config::BridgeConfig;
use crate::events::EventHub;
use crate::host::{EditorHost, HostEvent};
use crate::policy::CommandPolicy;
use crate::snapshot::SnapshotStore;
use crate::token;
use crate::trace::{TraceBuffer, TraceItem, TraceKind, TraceStatus};
use crate::tx::TxEngine;
use crate::{Error, Result};
use bridge_protocol::{Notification, Request, RequestId, Response};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

// ============================================================================
// Connections
// ============================================================================

/// Identifies one transport connection for the lifetime of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Free-text caveats reported by `bridge.capabilities`.
const LIMITATIONS: &[&str] = &[
    "Commands run headless; methods that would require UI interaction are unavailable",
    "Snapshot restore only covers files tracked by version control",
    "Debug support is limited to session lifecycle, not breakpoint control",
];

// ============================================================================
// Gateway
// ============================================================================

pub struct Gateway {
    token: String,
    host: Arc<dyn EditorHost>,
    policy: CommandPolicy,
    pub(crate) transactions: TxEngine,
    pub(crate) events: EventHub,
    pub(crate) traces: TraceBuffer,
    pub(crate) snapshots: SnapshotStore,
    /// Code-action handles keyed by id, owned by the listing connection.
    action_owner: Mutex<HashMap<String, ConnectionId>>,
    /// Outbound notification channels, one per live connection.
    connections: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Value>>>,
    next_connection: AtomicU64,
}

impl Gateway {
    pub fn new(config: &BridgeConfig, token: String, host: Arc<dyn EditorHost>) -> Self {
        Self {
            token,
            host,
            policy: CommandPolicy::new(&config.commands),
            transactions: TxEngine::new(),
            events: EventHub::new(config.event_capacity),
            traces: TraceBuffer::new(config.trace_capacity),
            snapshots: SnapshotStore::new(config.workspace_root()),
            action_owner: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &dyn EditorHost {
        self.host.as_ref()
    }

    pub fn traces(&self) -> &TraceBuffer {
        &self.traces
    }

    /// Register a connection and its outbound notification channel.
    pub fn register_connection(&self, outbound: mpsc::UnboundedSender<Value>) -> ConnectionId {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        self.connections
            .lock()
            .expect("connection map lock poisoned")
            .insert(id, outbound);
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Drop a connection and sweep everything it owned: subscriptions and
    /// code-action handles. Transactions deliberately survive so a client
    /// can reconnect and roll back.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections
            .lock()
            .expect("connection map lock poisoned")
            .remove(&connection);
        self.events.remove_connection(connection);
        self.action_owner
            .lock()
            .expect("action map lock poisoned")
            .retain(|_, owner| *owner != connection);
        debug!(connection = %connection, "Connection swept");
    }

    pub(crate) fn claim_action(&self, action_id: &str, connection: ConnectionId) {
        self.action_owner
            .lock()
            .expect("action map lock poisoned")
            .insert(action_id.to_string(), connection);
    }

    /// Validate that `connection` may apply `action_id`, consuming the
    /// handle on success.
    pub(crate) fn take_action(&self, action_id: &str, connection: ConnectionId) -> Result<()> {
        let mut owners = self.action_owner.lock().expect("action map lock poisoned");
        match owners.get(action_id) {
            None => Err(Error::not_found_with(
                "Unknown code action",
                json!({ "actionId": action_id }),
            )),
            Some(owner) if *owner != connection => Err(Error::permission(
                "Code action belongs to another connection",
            )),
            Some(_) => {
                owners.remove(action_id);
                Ok(())
            }
        }
    }

    pub(crate) fn check_command(&self, command: &str) -> Result<()> {
        self.policy.check(command).map_err(|reason| {
            Error::permission_with(
                reason.as_str(),
                json!({ "command": command, "reason": reason.as_str() }),
            )
        })
    }

    fn notify(&self, connection: ConnectionId, notification: Notification) {
        let value = match serde_json::to_value(&notification) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "Failed to serialize notification");
                return;
            }
        };
        let connections = self.connections.lock().expect("connection map lock poisoned");
        if let Some(sender) = connections.get(&connection) {
            // A closed channel means the connection is going away; the
            // disconnect sweep handles the rest.
            let _ = sender.send(value);
        }
    }

    /// Deliver one replayed or freshly emitted event as a notification.
    pub(crate) fn deliver_one(&self, delivery: &crate::events::Delivery) {
        self.notify(
            delivery.connection,
            Notification::new(
                "events.event",
                json!({
                    "subscriptionId": delivery.subscription_id,
                    "seq": delivery.record.seq,
                    "timestamp": delivery.record.timestamp,
                    "name": delivery.record.name,
                    "payload": delivery.record.payload,
                }),
            ),
        );
    }

    pub(crate) fn deliver(&self, deliveries: &[crate::events::Delivery]) {
        for delivery in deliveries {
            self.deliver_one(delivery);
        }
    }

    // ========================================================================
    // Event pump
    // ========================================================================

    /// Fan host push notifications out to the event ring, the trace
    /// buffer, and every matching subscriber. Runs until the host's event
    /// channel closes.
    pub fn start_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let mut receiver = gateway.host.subscribe_events();
        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Host event receiver lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                gateway.publish_host_event(&event);
            }
        })
    }

    /// Route one host event to the ring, the trace buffer, and all
    /// matching subscribers. The pump calls this; tests and embedders can
    /// feed events synchronously.
    pub fn publish_host_event(&self, event: &HostEvent) {
        let name = event.name();
        let payload = event.payload();
        let (record, deliveries) = self.events.emit(name, payload.clone());

        let kind = if name == "diagnostics.changed" {
            TraceKind::Diagnostics
        } else {
            TraceKind::Event
        };
        self.traces.push(
            TraceItem::new(kind, name, format!("seq {}", record.seq))
                .with_detail(payload)
                .with_status(TraceStatus::Success),
        );

        self.deliver(&deliveries);
    }

    // ========================================================================
    // Request handling
    // ========================================================================

    /// Handle one inbound frame, producing the response frame.
    ///
    /// Authentication runs before anything else; a bad token means the
    /// method handler never executes and no side effect is observable.
    /// Well-formed notifications (null id) are dispatched but produce no
    /// response.
    pub async fn handle_message(&self, connection: ConnectionId, message: Value) -> Option<Value> {
        let request: Request = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(err) => {
                let response = Response::err(
                    RequestId::Null,
                    bridge_protocol::ErrorCode::InvalidParams,
                    format!("Malformed request: {err}"),
                    None,
                );
                return serde_json::to_value(response).ok();
            }
        };

        let id = request.id.clone();
        let method = request.method.clone();

        if let Err(err) = self.check_auth(&request.params) {
            if id.is_notification() {
                warn!(method = %method, "Unauthenticated notification dropped");
                return None;
            }
            let response = Response::err(id, err.code(), err.to_string(), err.data());
            return serde_json::to_value(response).ok();
        }

        // Requests of the same method can be in flight concurrently, so the
        // pending item carries a nonce and the post-dispatch flip targets
        // exactly this request's item.
        let trace_id = Uuid::new_v4().to_string();
        self.traces.push(
            TraceItem::new(TraceKind::Rpc, &method, format!("{connection}"))
                .with_detail(json!({
                    "requestId": trace_id,
                    "params": mask_params(&request.params),
                }))
                .with_status(TraceStatus::Pending),
        );

        let outcome = self.dispatch(connection, &method, request.params).await;

        let trace_status = if outcome.is_ok() {
            TraceStatus::Success
        } else {
            TraceStatus::Error
        };
        self.traces.update_last(
            |item| {
                item.kind == TraceKind::Rpc
                    && item.detail["requestId"].as_str() == Some(trace_id.as_str())
            },
            |item| item.status = Some(trace_status),
        );

        if id.is_notification() {
            return None;
        }
        let response = match outcome {
            Ok(result) => Response::ok(id, result),
            Err(err) => {
                debug!(method = %method, error = %err, "Request failed");
                Response::err(id, err.code(), err.to_string(), err.data())
            }
        };
        serde_json::to_value(response).ok()
    }

    fn check_auth(&self, params: &Value) -> Result<()> {
        match params.pointer("/auth/token").and_then(Value::as_str) {
            Some(presented) if presented == self.token => Ok(()),
            Some(_) => Err(Error::Auth("Invalid token".to_string())),
            None => Err(Error::Auth("Missing auth.token".to_string())),
        }
    }
}

/// Params cloned for tracing, with the token blanked out.
fn mask_params(params: &Value) -> Value {
    let mut masked = params.clone();
    if let Some(token_slot) = masked.pointer_mut("/auth/token") {
        *token_slot = Value::String(token::MASKED.to_string());
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_params_hides_token() {
        let params = json!({"auth": {"token": "secret"}, "uri": "file:///a.rs"});
        let masked = mask_params(&params);
        assert_eq!(masked["auth"]["token"], "***");
        assert_eq!(masked["uri"], "file:///a.rs");
        // Original untouched.
        assert_eq!(params["auth"]["token"], "secret");
    }

    #[test]
    fn test_mask_params_without_auth() {
        let params = json!({"uri": "file:///a.rs"});
        assert_eq!(mask_params(&params), params);
    }
}
