//! End-to-end tests for the long-running deploy composition: progress
//! events, failure paths, drain cancellation and SSE replay.

mod common;

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use mmg::build_router;
use mmg_progress::{EventKind, EventPayload, OperationStatus};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use common::{harness, rpc};

async fn call_tool(router: &axum::Router, name: &str, arguments: Value) -> Value {
    let body = rpc("tools/call", json!({"name": name, "arguments": arguments}));
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    value["result"].clone()
}

fn envelope_payload(result: &Value) -> Value {
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn test_deploy_happy_path_event_sequence() {
    let harness = harness(&[]).await;
    harness
        .mock
        .script_statuses(&["DEPLOYING", "DEPLOYING", "DEPLOYED"]);
    let router = build_router(Arc::clone(&harness.state));

    let result = call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await;
    assert_eq!(result["isError"], false);
    assert_eq!(harness.mock.deploy_calls.load(Ordering::SeqCst), 1);

    let payload = envelope_payload(&result);
    let operation_id = payload["operation_id"].as_str().unwrap();
    assert!(operation_id.starts_with("deploy-m1-"));
    assert_eq!(payload["machine"]["status_name"], "DEPLOYED");

    let snapshot = harness.state.tracker.get_operation(operation_id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Complete);
    assert_eq!(snapshot.progress, 100);

    let events = harness.state.tracker.get_events(operation_id).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Status,   // "" -> initializing
            EventKind::Status,   // initializing -> in_progress
            EventKind::Progress, // 0
            EventKind::Progress, // 10
            EventKind::Progress, // 15
            EventKind::Progress, // 20
            EventKind::Status,   // in_progress -> complete
            EventKind::Completion,
        ]
    );
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![0, 10, 15, 20]);
}

#[tokio::test]
async fn test_deploy_failure_reports_error_event() {
    let harness = harness(&[]).await;
    harness
        .mock
        .script_statuses(&["DEPLOYING", "FAILED_DEPLOYMENT"]);
    let router = build_router(Arc::clone(&harness.state));

    let result = call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await;
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("FAILED_DEPLOYMENT"), "got: {}", text);

    let operation_id = harness
        .state
        .tracker
        .operation_ids()
        .into_iter()
        .next()
        .unwrap();
    let snapshot = harness.state.tracker.get_operation(&operation_id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Failed);
    let failure = snapshot.error.unwrap();
    assert_eq!(failure.code, 500);
    assert!(failure.message.contains("FAILED_DEPLOYMENT"));

    let events = harness.state.tracker.get_events(&operation_id).unwrap();
    let last = events.last().unwrap();
    let EventPayload::Error { code, message, .. } = &last.payload else {
        panic!("expected error event, got {:?}", last.payload);
    };
    assert_eq!(*code, 500);
    assert!(message.contains("FAILED_DEPLOYMENT"));
    let has_failed_status = events.iter().any(|e| {
        matches!(
            &e.payload,
            EventPayload::Status {
                current: OperationStatus::Failed,
                ..
            }
        )
    });
    assert!(has_failed_status);
}

#[tokio::test]
async fn test_deploy_poll_exhaustion_fails_with_timeout() {
    let harness = harness(&["--deploy-poll-limit", "3"]).await;
    harness.mock.script_statuses(&["DEPLOYING"]);
    let router = build_router(Arc::clone(&harness.state));

    let result = call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await;
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("timeout:"), "got: {}", text);

    let operation_id = harness
        .state
        .tracker
        .operation_ids()
        .into_iter()
        .next()
        .unwrap();
    let snapshot = harness.state.tracker.get_operation(&operation_id).unwrap();
    assert_eq!(snapshot.status, OperationStatus::Failed);
    assert_eq!(snapshot.error.unwrap().code, 504);
}

#[tokio::test]
async fn test_drain_cancel_stops_running_deploy() {
    let harness = harness(&[]).await;
    // Never reaches DEPLOYED; the deploy keeps polling until cancelled.
    harness.mock.script_statuses(&["DEPLOYING"]);
    let router = build_router(Arc::clone(&harness.state));

    let deploy = tokio::spawn({
        let router = router.clone();
        async move { call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await }
    });

    // Wait for the operation to appear.
    let operation_id = loop {
        if let Some(id) = harness.state.tracker.operation_ids().into_iter().next() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    // One subscriber attaches, then its scope fires; after the
    // disconnect timeout (100ms in this harness) with no reconnect, the
    // operation's scope is cancelled.
    let caller = CancellationToken::new();
    let _subscription = harness
        .state
        .tracker
        .subscribe(&operation_id, caller.clone(), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), deploy)
        .await
        .expect("deploy did not observe the cancel")
        .unwrap();
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("cancelled:"), "got: {}", text);

    // The scope watcher finalizes the record shortly after the scope fires.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let snapshot = harness.state.tracker.get_operation(&operation_id).unwrap();
        if snapshot.status == OperationStatus::Cancelled {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "operation never reached cancelled, stuck at {:?}",
            snapshot.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_cancel_operation_tool_is_idempotent() {
    let harness = harness(&[]).await;
    harness.mock.script_statuses(&["DEPLOYING"]);
    let router = build_router(Arc::clone(&harness.state));

    let deploy = tokio::spawn({
        let router = router.clone();
        async move { call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await }
    });
    let operation_id = loop {
        if let Some(id) = harness.state.tracker.operation_ids().into_iter().next() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    for _ in 0..3 {
        let result = call_tool(
            &router,
            "maas_cancel_operation",
            json!({"operation_id": operation_id}),
        )
        .await;
        assert_eq!(result["isError"], false);
        assert_eq!(envelope_payload(&result)["status"], "cancelled");
    }

    let result = tokio::time::timeout(Duration::from_secs(2), deploy)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result["isError"], true);

    // Exactly one cancelled status event despite three cancel calls.
    let events = harness.state.tracker.get_events(&operation_id).unwrap();
    let cancelled = events
        .iter()
        .filter(|e| {
            matches!(
                &e.payload,
                EventPayload::Status {
                    current: OperationStatus::Cancelled,
                    ..
                }
            )
        })
        .count();
    assert_eq!(cancelled, 1);
}

fn parse_sse_frames(body: &str) -> Vec<(String, String, Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut id = String::new();
            let mut event = String::new();
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(value) = line.strip_prefix("id: ") {
                    id = value.to_string();
                } else if let Some(value) = line.strip_prefix("event: ") {
                    event = value.to_string();
                } else if let Some(value) = line.strip_prefix("data: ") {
                    data = value.to_string();
                }
            }
            (id, event, serde_json::from_str(&data).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_sse_reconnect_replays_after_last_event_id() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (reporter, _token) = harness.state.tracker.start_operation("op-sse").unwrap();
    reporter.progress(10, "first", None).unwrap();
    reporter.progress(20, "second", None).unwrap();
    reporter.progress(30, "third", None).unwrap();

    // The client saw everything up to the first progress event.
    let events = harness.state.tracker.get_events("op-sse").unwrap();
    let last_seen = events
        .iter()
        .find(|e| e.kind() == EventKind::Progress)
        .unwrap()
        .id
        .clone();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp/operations/op-sse/events")
                .header("last-event-id", &last_seen)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    // Finish the operation so the stream closes and the body completes.
    reporter.complete(json!({"done": true}), "finished").unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let frames = parse_sse_frames(&String::from_utf8(bytes.to_vec()).unwrap());

    // Replay of the two missed progress events, then the live terminal
    // pair, in emission order.
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].1, "progress");
    assert_eq!(frames[0].2["percent"], 20);
    assert_eq!(frames[1].1, "progress");
    assert_eq!(frames[1].2["percent"], 30);
    assert_eq!(frames[2].1, "status");
    assert_eq!(frames[2].2["current"], "complete");
    assert_eq!(frames[3].1, "completion");
    for (id, _, _) in &frames {
        assert!(!id.is_empty());
        assert!(id.starts_with("op-sse:"));
    }
}

#[tokio::test]
async fn test_sse_unknown_operation_is_404() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp/operations/ghost/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_operation_status_tool_reflects_tracker() {
    let harness = harness(&[]).await;
    harness
        .mock
        .script_statuses(&["DEPLOYING", "DEPLOYING", "DEPLOYED"]);
    let router = build_router(Arc::clone(&harness.state));

    let result = call_tool(&router, "maas_deploy_machine", json!({"system_id": "m1"})).await;
    let operation_id = envelope_payload(&result)["operation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = call_tool(
        &router,
        "maas_operation_status",
        json!({"operation_id": operation_id}),
    )
    .await;
    assert_eq!(status["isError"], false);
    let payload = envelope_payload(&status);
    assert_eq!(payload["status"], "complete");
    assert_eq!(payload["progress"], 100);
    assert!(payload["event_count"].as_u64().unwrap() >= 8);
}
