//! Shared test harness: a scriptable mock MAAS region and gateway wiring.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use mmg::{AppState, GatewayConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Scriptable mock MAAS region controller.
pub struct MockMaas {
    pub list_machines_calls: AtomicUsize,
    pub list_tags_calls: AtomicUsize,
    pub deploy_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    /// Status names returned by successive machine detail reads; the last
    /// entry repeats once the script is exhausted.
    pub machine_statuses: Mutex<VecDeque<String>>,
}

impl MockMaas {
    fn new() -> Self {
        Self {
            list_machines_calls: AtomicUsize::new(0),
            list_tags_calls: AtomicUsize::new(0),
            deploy_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            machine_statuses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn script_statuses(&self, statuses: &[&str]) {
        let mut queue = self.machine_statuses.lock();
        queue.clear();
        queue.extend(statuses.iter().map(|s| (*s).to_string()));
    }

    fn next_status(&self) -> String {
        let mut queue = self.machine_statuses.lock();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| "Ready".to_string())
        }
    }
}

fn machine_json(system_id: &str, status_name: &str) -> Value {
    json!({
        "system_id": system_id,
        "hostname": format!("host-{}", system_id),
        "status_name": status_name,
        "architecture": "amd64/generic",
        "cpu_count": 4,
        "memory": 8192,
        "power_state": "on",
        "osystem": "ubuntu",
        "distro_series": "jammy",
        "tag_names": [],
        "zone": {"name": "default", "description": ""},
        "ip_addresses": ["10.0.0.10"],
    })
}

async fn list_machines(State(mock): State<Arc<MockMaas>>) -> Json<Value> {
    mock.list_machines_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!([machine_json("m1", "Ready"), machine_json("m2", "Deployed")]))
}

async fn machines_collection_op(
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match query.get("op").map(String::as_str) {
        Some("allocate") => Json(machine_json("m1", "Allocated")).into_response(),
        other => (
            StatusCode::BAD_REQUEST,
            format!("unexpected op {:?}", other),
        )
            .into_response(),
    }
}

async fn upload_script() -> Json<Value> {
    Json(json!({"name": "50-custom", "script_type": 2, "tags": []}))
}

async fn machine_detail(
    State(mock): State<Arc<MockMaas>>,
    Path(system_id): Path<String>,
) -> Json<Value> {
    let status = mock.next_status();
    Json(machine_json(&system_id, &status))
}

async fn machine_op(
    State(mock): State<Arc<MockMaas>>,
    Path(system_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match query.get("op").map(String::as_str) {
        Some("deploy") => {
            mock.deploy_calls.fetch_add(1, Ordering::SeqCst);
            Json(machine_json(&system_id, "Deploying")).into_response()
        }
        Some("release") => {
            mock.release_calls.fetch_add(1, Ordering::SeqCst);
            Json(machine_json(&system_id, "Releasing")).into_response()
        }
        Some("power_on") | Some("power_off") => {
            Json(machine_json(&system_id, "Ready")).into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            format!("unexpected op {:?}", other),
        )
            .into_response(),
    }
}

async fn list_tags(State(mock): State<Arc<MockMaas>>) -> Json<Value> {
    mock.list_tags_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!([
        {"name": "virtual", "comment": "", "definition": ""},
        {"name": "gpu", "comment": "has a GPU", "definition": ""},
    ]))
}

async fn create_tag() -> Json<Value> {
    Json(json!({"name": "new-tag", "comment": "", "definition": ""}))
}

async fn list_subnets() -> Json<Value> {
    Json(json!([
        {"id": 1, "name": "subnet-1", "cidr": "10.0.0.0/24", "managed": true},
    ]))
}

/// A running mock region plus the gateway state pointed at it.
pub struct TestHarness {
    pub mock: Arc<MockMaas>,
    pub state: Arc<AppState>,
    pub base_url: String,
}

/// Spin up the mock region on an ephemeral port and build gateway state
/// against it. Extra CLI flags tune cache/progress timings per test.
pub async fn harness(extra_args: &[&str]) -> TestHarness {
    let mock = Arc::new(MockMaas::new());
    let router = Router::new()
        .route(
            "/MAAS/api/2.0/machines/",
            get(list_machines).post(machines_collection_op),
        )
        .route(
            "/MAAS/api/2.0/machines/{system_id}/",
            get(machine_detail).post(machine_op),
        )
        .route("/MAAS/api/2.0/tags/", get(list_tags).post(create_tag))
        .route("/MAAS/api/2.0/subnets/", get(list_subnets))
        .route("/MAAS/api/2.0/scripts/", post(upload_script))
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock region");
    let addr = listener.local_addr().expect("mock region addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let base_url = format!("http://{}/MAAS", addr);
    let mut args = vec![
        "maas-mcp-gateway",
        "--maas-api-url",
        base_url.as_str(),
        "--maas-api-key",
        "consumer:token:secret",
        "--deploy-poll-interval-ms",
        "10",
        "--heartbeat-interval-ms",
        "60000",
        "--disconnect-timeout-ms",
        "100",
    ];
    args.extend_from_slice(extra_args);
    let config = GatewayConfig::try_parse_from(args).expect("test config");
    let state = Arc::new(AppState::from_config(&config).expect("gateway state"));

    TestHarness {
        mock,
        state,
        base_url,
    }
}

/// Build a JSON-RPC request body.
pub fn rpc(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    })
}
