//! End-to-end tests for the MCP JSON-RPC surface and the resource cache.

mod common;

use std::sync::{atomic::Ordering, Arc};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use mmg::build_router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{harness, rpc};

async fn post_mcp(router: &axum::Router, body: Value) -> (StatusCode, axum::http::HeaderMap, Value) {
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
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

#[tokio::test]
async fn test_initialize_reports_capabilities() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (status, _, body) = post_mcp(&router, rpc("initialize", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let result = &body["result"];
    assert_eq!(result["serverInfo"]["name"], "maas-mcp-gateway");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    assert_eq!(result["capabilities"]["resources"]["listChanged"], false);
    assert!(result["protocolVersion"].is_string());
}

#[tokio::test]
async fn test_tools_and_resources_are_listed() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (_, _, body) = post_mcp(&router, rpc("tools/list", json!({}))).await;
    let tools: Vec<String> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    for expected in [
        "maas_list_machines",
        "maas_get_machine_details",
        "maas_allocate_machine",
        "maas_deploy_machine",
        "maas_release_machine",
        "maas_power_on",
        "maas_power_off",
        "maas_list_tags",
        "maas_create_tag",
        "maas_tag_machine",
        "maas_untag_machine",
        "maas_upload_script",
        "maas_operation_status",
        "maas_cancel_operation",
    ] {
        assert!(tools.contains(&expected.to_string()), "missing {}", expected);
    }
    let deploy = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "maas_deploy_machine")
        .unwrap();
    assert_eq!(deploy["inputSchema"]["required"], json!(["system_id"]));

    let (_, _, body) = post_mcp(&router, rpc("resources/list", json!({}))).await;
    let uris: Vec<String> = body["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap().to_string())
        .collect();
    assert!(uris.contains(&"maas://machines".to_string()));
    assert!(uris.contains(&"maas://machines/{system_id}".to_string()));
    assert!(uris.contains(&"maas://subnets".to_string()));
    assert!(uris.contains(&"maas://tags".to_string()));
}

#[tokio::test]
async fn test_resource_read_caches_second_call() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let read = rpc("resources/read", json!({"uri": "maas://machines"}));
    let (status, headers, body) = post_mcp(&router, read.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("cache-control").unwrap(), "max-age=300");
    let text = body["result"]["contents"][0]["text"].as_str().unwrap();
    let machines: Value = serde_json::from_str(text).unwrap();
    assert_eq!(machines.as_array().unwrap().len(), 2);
    assert_eq!(harness.mock.list_machines_calls.load(Ordering::SeqCst), 1);

    let (_, headers, body2) = post_mcp(&router, read).await;
    // Same payload, no second upstream call.
    assert_eq!(body2["result"], body["result"]);
    assert_eq!(harness.mock.list_machines_calls.load(Ordering::SeqCst), 1);
    assert_eq!(headers.get("cache-control").unwrap(), "max-age=300");
}

#[tokio::test]
async fn test_lru_eviction_at_capacity_one() {
    let harness = harness(&["--cache-strategy", "lru", "--cache-max-size", "1"]).await;
    let router = build_router(Arc::clone(&harness.state));

    let machines = rpc("resources/read", json!({"uri": "maas://machines"}));
    let tags = rpc("resources/read", json!({"uri": "maas://tags"}));

    post_mcp(&router, machines.clone()).await;
    post_mcp(&router, tags).await;
    post_mcp(&router, machines).await;

    assert_eq!(harness.mock.list_machines_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.mock.list_tags_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mutating_tool_invalidates_machine_cache() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let read = rpc("resources/read", json!({"uri": "maas://machines"}));
    post_mcp(&router, read.clone()).await;
    post_mcp(&router, read.clone()).await;
    assert_eq!(harness.mock.list_machines_calls.load(Ordering::SeqCst), 1);

    let (_, _, body) = post_mcp(
        &router,
        rpc(
            "tools/call",
            json!({"name": "maas_release_machine", "arguments": {"system_id": "m1"}}),
        ),
    )
    .await;
    assert_eq!(body["result"]["isError"], false);
    assert_eq!(harness.mock.release_calls.load(Ordering::SeqCst), 1);

    post_mcp(&router, read).await;
    assert_eq!(harness.mock.list_machines_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_validation_failure_never_reaches_upstream() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (_, _, body) = post_mcp(
        &router,
        rpc(
            "tools/call",
            json!({"name": "maas_deploy_machine", "arguments": {"system_id": 42}}),
        ),
    )
    .await;
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("invalid_parameters:"), "got: {}", text);
    assert!(text.contains("system_id"));
    assert_eq!(harness.mock.deploy_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_allocate_and_upload_tools() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (_, _, body) = post_mcp(
        &router,
        rpc(
            "tools/call",
            json!({
                "name": "maas_allocate_machine",
                "arguments": {"cpu_count": 4, "tags": ["gpu"]},
            }),
        ),
    )
    .await;
    assert_eq!(body["result"]["isError"], false);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let machine: Value = serde_json::from_str(text).unwrap();
    assert_eq!(machine["status_name"], "Allocated");

    let (_, _, body) = post_mcp(
        &router,
        rpc(
            "tools/call",
            json!({
                "name": "maas_upload_script",
                "arguments": {"name": "50-custom", "content": "#!/bin/sh\ntrue\n"},
            }),
        ),
    )
    .await;
    assert_eq!(body["result"]["isError"], false);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let script: Value = serde_json::from_str(text).unwrap();
    assert_eq!(script["name"], "50-custom");
}

#[tokio::test]
async fn test_subnet_resources_read() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (status, _, body) = post_mcp(
        &router,
        rpc("resources/read", json!({"uri": "maas://subnets"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = body["result"]["contents"][0]["text"].as_str().unwrap();
    let subnets: Value = serde_json::from_str(text).unwrap();
    assert_eq!(subnets[0]["cidr"], "10.0.0.0/24");

    // A non-numeric subnet id is rejected before the upstream call.
    let (_, _, body) = post_mcp(
        &router,
        rpc("resources/read", json!({"uri": "maas://subnets/abc"})),
    )
    .await;
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_unknown_tool_and_resource() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (_, _, body) = post_mcp(
        &router,
        rpc("tools/call", json!({"name": "maas_nope", "arguments": {}})),
    )
    .await;
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("not_found:"));

    let (status, _, body) = post_mcp(
        &router,
        rpc("resources/read", json!({"uri": "maas://nonexistent"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (_, _, body) = post_mcp(&router, rpc("tools/destroy", json!({}))).await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_notifications_are_accepted_silently() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let (status, _, _) = post_mcp(
        &router,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_content_negotiation_guards() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("accept", "application/xml")
                .body(Body::from(rpc("ping", json!({})).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = harness(&[]).await;
    let router = build_router(Arc::clone(&harness.state));

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}
