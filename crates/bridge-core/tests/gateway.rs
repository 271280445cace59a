//! End-to-end gateway tests over an in-memory host, driving the same
//! JSON frames a transport would.

use bridge_core::host::HostEvent;
use bridge_core::{
    BridgeConfig, ConnectionId, EditorHost, Gateway, MemoryHost, TraceKind, TraceStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TOKEN: &str = "test-token";

struct Harness {
    gateway: Arc<Gateway>,
    host: Arc<MemoryHost>,
    connection: ConnectionId,
    notifications: mpsc::UnboundedReceiver<Value>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(BridgeConfig::default()).await
    }

    async fn with_config(config: BridgeConfig) -> Self {
        let host = Arc::new(MemoryHost::new());
        let gateway = Arc::new(Gateway::new(
            &config,
            TOKEN.to_string(),
            Arc::clone(&host) as Arc<dyn bridge_core::EditorHost>,
        ));
        let (tx, notifications) = mpsc::unbounded_channel();
        let connection = gateway.register_connection(tx);
        Self {
            gateway,
            host,
            connection,
            notifications,
        }
    }

    async fn call(&self, method: &str, mut params: Value) -> Value {
        params["auth"] = json!({"token": TOKEN});
        self.call_raw(method, params).await
    }

    async fn call_raw(&self, method: &str, params: Value) -> Value {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        self.gateway
            .handle_message(self.connection, request)
            .await
            .expect("request with id yields a response")
    }

    fn result(response: &Value) -> &Value {
        assert!(
            response.get("error").is_none(),
            "unexpected error: {response}"
        );
        &response["result"]
    }

    fn error_code(response: &Value) -> &str {
        response["error"]["code"].as_str().expect("error.code")
    }
}

// ============================================================================
// Auth / dispatch
// ============================================================================

#[tokio::test]
async fn test_ping_and_capabilities() {
    let h = Harness::new().await;

    let response = h.call("bridge.ping", json!({})).await;
    let result = Harness::result(&response);
    assert_eq!(result["ok"], true);
    assert_eq!(result["protocol"], "v1");

    let response = h.call("bridge.capabilities", json!({})).await;
    let result = Harness::result(&response);
    let methods = result["methods"].as_array().unwrap();
    assert!(methods.iter().any(|m| m == "tx.commit"));
    assert!(result["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e == "diagnostics.changed"));
    assert!(!result["limitations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_rejected_without_side_effect() {
    let h = Harness::new().await;
    h.host.insert_document("file:///a.rs", "rust", "before\n").await;

    let response = h
        .call_raw(
            "doc.applyEdits",
            json!({
                "uri": "file:///a.rs",
                "edits": [{"range": {"start": {"line": 0, "character": 0},
                                      "end": {"line": 1, "character": 0}},
                           "newText": "after\n"}],
            }),
        )
        .await;
    assert_eq!(Harness::error_code(&response), "E_AUTH");

    // The handler never ran.
    let doc = h.host.open_document("file:///a.rs").await.unwrap();
    assert_eq!(doc.text, "before\n");
    assert_eq!(doc.version, 1);
}

#[tokio::test]
async fn test_wrong_token_rejected() {
    let h = Harness::new().await;
    let response = h
        .call_raw("bridge.ping", json!({"auth": {"token": "wrong"}}))
        .await;
    assert_eq!(Harness::error_code(&response), "E_AUTH");
}

#[tokio::test]
async fn test_notification_yields_no_response() {
    let h = Harness::new().await;
    let request = json!({
        "jsonrpc": "2.0",
        "method": "bridge.ping",
        "params": {"auth": {"token": TOKEN}},
    });
    assert!(h
        .gateway
        .handle_message(h.connection, request)
        .await
        .is_none());
}

#[tokio::test]
async fn test_unknown_method_not_found() {
    let h = Harness::new().await;
    let response = h.call("bridge.selfDestruct", json!({})).await;
    assert_eq!(Harness::error_code(&response), "E_NOT_FOUND");
    assert_eq!(response["error"]["data"]["method"], "bridge.selfDestruct");
}

#[tokio::test]
async fn test_malformed_frame_gets_null_id_error() {
    let h = Harness::new().await;
    let response = h
        .gateway
        .handle_message(h.connection, json!({"jsonrpc": "2.0", "id": 1}))
        .await
        .expect("malformed frames still get a response");
    assert_eq!(Harness::error_code(&response), "E_INVALID_PARAMS");
    assert!(response["id"].is_null());
}

// ============================================================================
// Transactions over the wire
// ============================================================================

async fn begin_tx(h: &Harness) -> String {
    let response = h.call("tx.begin", json!({})).await;
    Harness::result(&response)["txId"]
        .as_str()
        .unwrap()
        .to_string()
}

fn line_one_edit(new_text: &str) -> Value {
    json!([{
        "range": {"start": {"line": 0, "character": 0},
                  "end": {"line": 1, "character": 0}},
        "newText": new_text,
    }])
}

#[tokio::test]
async fn test_commit_at_matching_version() {
    let h = Harness::new().await;
    h.host
        .insert_document("file:///a.rs", "rust", "line one\nline two\n")
        .await;
    // Drive the version to 3 like an editor that saved twice.
    h.host
        .replace_document("file:///a.rs", "line 1\nline two\n")
        .await
        .unwrap();
    h.host
        .replace_document("file:///a.rs", "first\nline two\n")
        .await
        .unwrap();
    assert_eq!(h.host.open_document("file:///a.rs").await.unwrap().version, 3);

    let tx_id = begin_tx(&h).await;
    let response = h
        .call(
            "tx.stageEdits",
            json!({"txId": tx_id, "uri": "file:///a.rs", "edits": line_one_edit("FIRST\n")}),
        )
        .await;
    assert_eq!(Harness::result(&response)["staged"], true);

    let response = h.call("tx.commit", json!({"txId": tx_id})).await;
    let result = Harness::result(&response);
    assert_eq!(result["committed"], true);
    assert_eq!(result["fileCount"], 1);

    let response = h.call("doc.read", json!({"uri": "file:///a.rs"})).await;
    assert_eq!(Harness::result(&response)["text"], "FIRST\nline two\n");

    // Transaction id is gone.
    let response = h.call("tx.preview", json!({"txId": tx_id})).await;
    assert_eq!(Harness::error_code(&response), "E_NOT_FOUND");
}

#[tokio::test]
async fn test_commit_version_mismatch_cites_both_versions() {
    let h = Harness::new().await;
    h.host
        .insert_document("file:///a.rs", "rust", "line one\n")
        .await;
    h.host.replace_document("file:///a.rs", "v2\n").await.unwrap();
    h.host.replace_document("file:///a.rs", "v3\n").await.unwrap();

    let tx_id = begin_tx(&h).await;
    h.call(
        "tx.stageEdits",
        json!({"txId": tx_id, "uri": "file:///a.rs", "edits": line_one_edit("staged\n")}),
    )
    .await;

    // Concurrent edit bumps the version to 4 before commit.
    h.host.replace_document("file:///a.rs", "v4\n").await.unwrap();

    let response = h.call("tx.commit", json!({"txId": tx_id})).await;
    assert_eq!(Harness::error_code(&response), "E_FAILED");
    let mismatch = &response["error"]["data"]["mismatches"][0];
    assert_eq!(mismatch["uri"], "file:///a.rs");
    assert_eq!(mismatch["expectedVersion"], 3);
    assert_eq!(mismatch["actualVersion"], 4);

    // Nothing applied; transaction survives for rollback.
    assert_eq!(h.host.open_document("file:///a.rs").await.unwrap().text, "v4\n");
    let response = h.call("tx.rollback", json!({"txId": tx_id})).await;
    assert_eq!(Harness::result(&response)["existed"], true);
}

#[tokio::test]
async fn test_preview_idempotent_over_wire() {
    let h = Harness::new().await;
    h.host.insert_document("file:///a.rs", "rust", "old\n").await;

    let tx_id = begin_tx(&h).await;
    h.call(
        "tx.stageEdits",
        json!({"txId": tx_id, "uri": "file:///a.rs", "edits": line_one_edit("new\n")}),
    )
    .await;

    let first = h.call("tx.preview", json!({"txId": tx_id})).await;
    let second = h.call("tx.preview", json!({"txId": tx_id})).await;
    assert_eq!(Harness::result(&first), Harness::result(&second));
    assert!(Harness::result(&first)["diff"]
        .as_str()
        .unwrap()
        .contains("+new"));
}

#[tokio::test]
async fn test_rollback_unknown_tx_reports_not_existed() {
    let h = Harness::new().await;
    let response = h.call("tx.rollback", json!({"txId": "nope"})).await;
    let result = Harness::result(&response);
    assert_eq!(result["rolledBack"], true);
    assert_eq!(result["existed"], false);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_subscribe_replays_most_recent_matching() {
    let mut h = Harness::new().await;

    for i in 0..5 {
        h.gateway.publish_host_event(&HostEvent::DiagnosticsChanged {
            uris: vec![format!("file:///f{i}.rs")],
        });
    }

    let response = h
        .call(
            "events.subscribe",
            json!({"names": ["diagnostics.changed"], "replay": 2}),
        )
        .await;
    let subscription_id = Harness::result(&response)["subscriptionId"]
        .as_str()
        .unwrap()
        .to_string();

    // Two replayed notifications, oldest of the pair first, then a live one.
    let mut seen = Vec::new();
    h.gateway.publish_host_event(&HostEvent::DiagnosticsChanged {
        uris: vec!["file:///live.rs".to_string()],
    });
    while let Ok(notification) = h.notifications.try_recv() {
        assert_eq!(notification["method"], "events.event");
        assert_eq!(notification["params"]["subscriptionId"], subscription_id);
        seen.push(notification["params"]["payload"]["uris"][0]
            .as_str()
            .unwrap()
            .to_string());
    }
    assert_eq!(seen, vec!["file:///f3.rs", "file:///f4.rs", "file:///live.rs"]);
}

#[tokio::test]
async fn test_filtered_subscription_skips_other_events() {
    let mut h = Harness::new().await;
    h.call("events.subscribe", json!({"names": ["tasks.exit"]}))
        .await;

    h.gateway.publish_host_event(&HostEvent::DiagnosticsChanged {
        uris: vec!["file:///a.rs".to_string()],
    });
    h.gateway.publish_host_event(&HostEvent::TaskExit {
        execution_id: "t1".to_string(),
        name: "build".to_string(),
        exit_code: Some(0),
    });

    let notification = h.notifications.try_recv().unwrap();
    assert_eq!(notification["params"]["name"], "tasks.exit");
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_owner_only() {
    let h = Harness::new().await;
    let response = h.call("events.subscribe", json!({})).await;
    let subscription_id = Harness::result(&response)["subscriptionId"]
        .as_str()
        .unwrap()
        .to_string();

    // Another connection cannot remove it.
    let (tx, _rx) = mpsc::unbounded_channel();
    let intruder = h.gateway.register_connection(tx);
    let request = json!({
        "jsonrpc": "2.0", "id": 9, "method": "events.unsubscribe",
        "params": {"auth": {"token": TOKEN}, "subscriptionId": subscription_id},
    });
    let response = h.gateway.handle_message(intruder, request).await.unwrap();
    assert_eq!(Harness::error_code(&response), "E_PERMISSION");

    // Owner can; a second removal reports removed: false.
    let response = h
        .call("events.unsubscribe", json!({"subscriptionId": subscription_id}))
        .await;
    assert_eq!(Harness::result(&response)["removed"], true);
    let response = h
        .call("events.unsubscribe", json!({"subscriptionId": subscription_id}))
        .await;
    assert_eq!(Harness::result(&response)["removed"], false);
}

// ============================================================================
// Commands / policy
// ============================================================================

#[tokio::test]
async fn test_denied_command_never_executes() {
    let mut config = BridgeConfig::default();
    config.commands.deny.push("workbench.reload".to_string());
    let h = Harness::with_config(config).await;
    h.host
        .register_command("workbench.reload", json!("reloaded"))
        .await;

    let response = h
        .call("command.execute", json!({"command": "workbench.reload"}))
        .await;
    assert_eq!(Harness::error_code(&response), "E_PERMISSION");
    assert_eq!(
        response["error"]["data"]["reason"],
        "Denied by settings"
    );
}

#[tokio::test]
async fn test_allowlist_blocks_unlisted_commands() {
    let mut config = BridgeConfig::default();
    config.commands.allow.push("editor.fold".to_string());
    let h = Harness::with_config(config).await;
    h.host.register_command("editor.fold", json!(null)).await;
    h.host.register_command("other.cmd", json!(null)).await;

    let response = h.call("command.execute", json!({"command": "editor.fold"})).await;
    assert!(response.get("error").is_none());

    let response = h.call("command.execute", json!({"command": "other.cmd"})).await;
    assert_eq!(
        response["error"]["data"]["reason"],
        "Not allowlisted by settings"
    );
}

// ============================================================================
// Documents / refactors
// ============================================================================

#[tokio::test]
async fn test_apply_edits_checks_expected_version() {
    let h = Harness::new().await;
    h.host.insert_document("file:///a.rs", "rust", "x\n").await;

    let response = h
        .call(
            "doc.applyEdits",
            json!({"uri": "file:///a.rs", "edits": line_one_edit("y\n"), "expectedVersion": 7}),
        )
        .await;
    assert_eq!(Harness::error_code(&response), "E_FAILED");
    assert_eq!(response["error"]["data"]["expectedVersion"], 7);
    assert_eq!(response["error"]["data"]["actualVersion"], 1);

    let response = h
        .call(
            "doc.applyEdits",
            json!({"uri": "file:///a.rs", "edits": line_one_edit("y\n"), "expectedVersion": 1}),
        )
        .await;
    let result = Harness::result(&response);
    assert_eq!(result["applied"], true);
    assert_eq!(result["newVersion"], 2);
}

#[tokio::test]
async fn test_code_action_handles_are_connection_owned() {
    let h = Harness::new().await;
    h.host
        .insert_document("file:///a.rs", "rust", "bad line\n")
        .await;
    let mut edits = bridge_core::host::WorkspaceEdits::default();
    edits.changes.insert(
        "file:///a.rs".to_string(),
        serde_json::from_value(line_one_edit("good line\n")).unwrap(),
    );
    h.host
        .register_code_action("file:///a.rs", "Fix it", Some("quickfix"), edits, None)
        .await;

    let response = h
        .call(
            "refactor.codeActions",
            json!({"uri": "file:///a.rs",
                   "range": {"start": {"line": 0, "character": 0},
                             "end": {"line": 0, "character": 1}}}),
        )
        .await;
    let action_id = Harness::result(&response)["actions"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Another connection cannot apply the handle it never listed.
    let (tx, _rx) = mpsc::unbounded_channel();
    let intruder = h.gateway.register_connection(tx);
    let request = json!({
        "jsonrpc": "2.0", "id": 2, "method": "refactor.codeActions.apply",
        "params": {"auth": {"token": TOKEN}, "actionId": action_id},
    });
    let response = h.gateway.handle_message(intruder, request).await.unwrap();
    assert_eq!(Harness::error_code(&response), "E_PERMISSION");

    let response = h
        .call("refactor.codeActions.apply", json!({"actionId": action_id}))
        .await;
    let result = Harness::result(&response);
    assert_eq!(result["editApplied"], true);
    assert_eq!(result["commandExecuted"], false);
    assert_eq!(
        h.host.open_document("file:///a.rs").await.unwrap().text,
        "good line\n"
    );

    // Handles are one-shot.
    let response = h
        .call("refactor.codeActions.apply", json!({"actionId": action_id}))
        .await;
    assert_eq!(Harness::error_code(&response), "E_NOT_FOUND");
}

#[tokio::test]
async fn test_rename_applies_across_documents() {
    let h = Harness::new().await;
    h.host
        .insert_document("file:///a.rs", "rust", "fn helper() {}\n")
        .await;
    h.host
        .insert_document("file:///b.rs", "rust", "helper();\n")
        .await;

    let response = h
        .call(
            "refactor.rename",
            json!({"uri": "file:///a.rs",
                   "position": {"line": 0, "character": 3},
                   "newName": "assist"}),
        )
        .await;
    assert_eq!(Harness::result(&response)["applied"], true);
    assert_eq!(
        h.host.open_document("file:///b.rs").await.unwrap().text,
        "assist();\n"
    );
}

// ============================================================================
// Tasks / waits
// ============================================================================

#[tokio::test]
async fn test_await_exit_observes_finish() {
    let h = Harness::new().await;
    h.host.add_task("build", "shell").await;

    let response = h.call("tasks.run", json!({"name": "build"})).await;
    let task_id = Harness::result(&response)["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    let finisher = {
        let host = Arc::clone(&h.host);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            host.finish_task(&task_id, 0).await;
        })
    };

    let response = h
        .call(
            "tasks.awaitExit",
            json!({"taskId": task_id, "timeoutMs": 2000}),
        )
        .await;
    let result = Harness::result(&response);
    assert_eq!(result["observed"], true);
    assert_eq!(result["exitCode"], 0);
    finisher.await.unwrap();
}

#[tokio::test]
async fn test_await_exit_times_out() {
    let h = Harness::new().await;
    h.host.add_task("build", "shell").await;
    let response = h.call("tasks.run", json!({"name": "build"})).await;
    let task_id = Harness::result(&response)["taskId"].as_str().unwrap().to_string();

    let response = h
        .call("tasks.awaitExit", json!({"taskId": task_id, "timeoutMs": 10}))
        .await;
    let result = Harness::result(&response);
    assert_eq!(result["observed"], false);
    assert!(result.get("exitCode").is_none());
}

#[tokio::test]
async fn test_unknown_task_not_found() {
    let h = Harness::new().await;
    let response = h.call("tasks.run", json!({"name": "missing"})).await;
    assert_eq!(Harness::error_code(&response), "E_NOT_FOUND");
}

// ============================================================================
// Orchestration
// ============================================================================

async fn seed_fixable_diagnostic(h: &Harness) {
    h.host
        .insert_document("file:///a.rs", "rust", "broken line\n")
        .await;
    h.host
        .set_diagnostics(
            "file:///a.rs",
            vec![serde_json::from_value(json!({
                "range": {"start": {"line": 0, "character": 0},
                          "end": {"line": 0, "character": 6}},
                "message": "broken",
                "severity": "error",
            }))
            .unwrap()],
        )
        .await;
    let mut edits = bridge_core::host::WorkspaceEdits::default();
    edits.changes.insert(
        "file:///a.rs".to_string(),
        serde_json::from_value(line_one_edit("fixed line\n")).unwrap(),
    );
    h.host
        .register_code_action("file:///a.rs", "Fix broken", Some("quickfix"), edits, None)
        .await;
}

#[tokio::test]
async fn test_plan_and_execute_dry_run_rolls_back() {
    let h = Harness::new().await;
    seed_fixable_diagnostic(&h).await;

    let response = h.call("agent.planAndExecute", json!({"dryRun": true})).await;
    let result = Harness::result(&response);
    assert_eq!(result["dryRun"], true);
    assert_eq!(result["rolledBack"], true);
    assert!(result["preview"]["diff"].as_str().unwrap().contains("+fixed line"));

    // Nothing was applied.
    assert_eq!(
        h.host.open_document("file:///a.rs").await.unwrap().text,
        "broken line\n"
    );
}

#[tokio::test]
async fn test_plan_and_execute_commits_fix() {
    let h = Harness::new().await;
    seed_fixable_diagnostic(&h).await;

    let response = h.call("agent.planAndExecute", json!({})).await;
    let result = Harness::result(&response);
    assert_eq!(result["committed"], true);
    assert_eq!(result["fileCount"], 1);
    assert_eq!(result["diagnosticsBefore"], 1);
    assert_eq!(
        h.host.open_document("file:///a.rs").await.unwrap().text,
        "fixed line\n"
    );
}

#[tokio::test]
async fn test_plan_and_execute_clean_workspace_commits_empty() {
    let h = Harness::new().await;
    let response = h.call("agent.planAndExecute", json!({})).await;
    let result = Harness::result(&response);
    assert_eq!(result["committed"], true);
    assert_eq!(result["fileCount"], 0);
}

// ============================================================================
// Traces
// ============================================================================

#[tokio::test]
async fn test_rpc_trace_masks_token_and_flips_status() {
    let h = Harness::new().await;
    h.call("bridge.ping", json!({})).await;

    let traces = h.gateway.traces().list();
    let rpc = traces
        .iter()
        .find(|t| t.kind == TraceKind::Rpc && t.name == "bridge.ping")
        .expect("rpc trace item");
    assert_eq!(rpc.status, Some(TraceStatus::Success));
    assert_eq!(rpc.detail["params"]["auth"]["token"], "***");
}

#[tokio::test]
async fn test_concurrent_same_method_traces_flip_independently() {
    let h = Harness::new().await;
    h.host.add_task("build", "shell").await;
    let response = h.call("tasks.run", json!({"name": "build"})).await;
    let task_id = Harness::result(&response)["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    // First request outlives the second, so it completes while the second
    // same-method item is still pending.
    let slow = {
        let gateway = Arc::clone(&h.gateway);
        let connection = h.connection;
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let request = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tasks.awaitExit",
                "params": {
                    "auth": {"token": TOKEN},
                    "taskId": task_id,
                    "timeoutMs": 50,
                },
            });
            gateway.handle_message(connection, request).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let lingering = {
        let gateway = Arc::clone(&h.gateway);
        let connection = h.connection;
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let request = json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tasks.awaitExit",
                "params": {
                    "auth": {"token": TOKEN},
                    "taskId": task_id,
                    "timeoutMs": 2000,
                },
            });
            gateway.handle_message(connection, request).await
        })
    };

    slow.await.unwrap();

    // The first request's item (the older of the two) flipped; the second
    // request is still in flight and its item must remain pending.
    let await_items: Vec<_> = h
        .gateway
        .traces()
        .list()
        .into_iter()
        .filter(|t| t.kind == TraceKind::Rpc && t.name == "tasks.awaitExit")
        .collect();
    assert_eq!(await_items.len(), 2);
    assert_eq!(await_items[0].status, Some(TraceStatus::Success));
    assert_eq!(await_items[1].status, Some(TraceStatus::Pending));

    h.host.finish_task(&task_id, 0).await;
    lingering.await.unwrap();
}

#[tokio::test]
async fn test_failed_request_traced_as_error() {
    let h = Harness::new().await;
    h.call("doc.read", json!({"uri": "file:///missing.rs"})).await;

    let traces = h.gateway.traces().list();
    let rpc = traces
        .iter()
        .find(|t| t.kind == TraceKind::Rpc && t.name == "doc.read")
        .expect("rpc trace item");
    assert_eq!(rpc.status, Some(TraceStatus::Error));
}
