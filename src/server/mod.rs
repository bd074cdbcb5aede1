//! HTTP shell: the `/mcp` JSON-RPC endpoint, operation event streams and
//! the health probe.

pub mod sse;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{ACCEPT, AGE, CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mmg_maas_client::{ApiCredentials, MaasClient};
use mmg_progress::ProgressTracker;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::{
    cache::ResponseCache,
    config::GatewayConfig,
    dispatch::{ResourceContext, ResourceRegistry, ToolContext, ToolRegistry, ToolSettings},
    error::{GatewayError, GatewayResult},
    protocol::{
        InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ReadResourceParams,
        RequestId, ResourceReadResult, ToolCallParams, SERVER_NAME,
    },
    resources, tools,
};

/// Process-wide singletons, wired once at boot and shared by reference.
pub struct AppState {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub tracker: ProgressTracker,
    pub maas: Arc<MaasClient>,
    pub cache: Arc<ResponseCache>,
    pub settings: Arc<ToolSettings>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let credentials = ApiCredentials::parse(&config.maas_api_key)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let maas = MaasClient::new(&config.maas_api_url, credentials, config.upstream_timeout())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let cache = Arc::new(ResponseCache::from_config(config));
        let mut tool_registry = ToolRegistry::new();
        tools::register_all(&mut tool_registry)?;
        let mut resource_registry = ResourceRegistry::new(Arc::clone(&cache));
        resources::register_all(&mut resource_registry)?;

        Ok(Self {
            tools: tool_registry,
            resources: resource_registry,
            tracker: ProgressTracker::new(config.tracker_config()),
            maas: Arc::new(maas),
            cache,
            settings: Arc::new(ToolSettings {
                deploy_poll_interval: config.deploy_poll_interval(),
                deploy_poll_limit: config.deploy_poll_limit,
            }),
        })
    }

    fn tool_context(&self, progress_token: Option<Value>) -> ToolContext {
        ToolContext {
            cancel: CancellationToken::new(),
            tracker: self.tracker.clone(),
            maas: Arc::clone(&self.maas),
            cache: Arc::clone(&self.cache),
            settings: Arc::clone(&self.settings),
            progress_token,
        }
    }

    fn resource_context(&self) -> ResourceContext {
        ResourceContext {
            cancel: CancellationToken::new(),
            maas: Arc::clone(&self.maas),
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/mcp/operations/{operation_id}/events", get(sse::operation_events))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_mcp(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        if !content_type.starts_with("application/json") {
            let error = GatewayError::UnsupportedMediaType(content_type.to_string());
            return rpc_error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, None, &error);
        }
    }
    if let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) {
        if !accept_allows_json(accept) {
            let error = GatewayError::NotAcceptable(accept.to_string());
            return rpc_error_response(StatusCode::NOT_ACCEPTABLE, None, &error);
        }
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return rpc_response(JsonRpcResponse::failure(
                None,
                JsonRpcError {
                    code: -32700,
                    message: format!("parse error: {}", e),
                    data: None,
                },
            ))
        }
    };
    if request.jsonrpc != "2.0" {
        return rpc_response(JsonRpcResponse::failure(
            request.id,
            JsonRpcError {
                code: -32600,
                message: "jsonrpc must be \"2.0\"".to_string(),
                data: None,
            },
        ));
    }

    debug!("Dispatching MCP method '{}'", request.method);
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => rpc_response(JsonRpcResponse::success(
            id,
            json!(InitializeResult::current()),
        )),
        "ping" => rpc_response(JsonRpcResponse::success(id, json!({}))),
        "tools/list" => rpc_response(JsonRpcResponse::success(
            id,
            json!({"tools": state.tools.list()}),
        )),
        "resources/list" => rpc_response(JsonRpcResponse::success(
            id,
            json!({"resources": state.resources.list()}),
        )),
        "tools/call" => handle_tool_call(&state, id, request.params).await,
        "resources/read" => handle_resource_read(&state, id, request.params).await,
        method if method.starts_with("notifications/") => {
            StatusCode::ACCEPTED.into_response()
        }
        method => rpc_response(JsonRpcResponse::failure(
            id,
            JsonRpcError {
                code: -32601,
                message: format!("method '{}' not found", method),
                data: None,
            },
        )),
    }
}

async fn handle_tool_call(
    state: &AppState,
    id: Option<RequestId>,
    params: Option<Value>,
) -> Response {
    let params: ToolCallParams = match parse_params(params) {
        Ok(params) => params,
        Err(response) => return rpc_response(JsonRpcResponse::failure(id, response)),
    };
    let progress_token = params.meta.and_then(|meta| meta.progress_token);
    let ctx = state.tool_context(progress_token);
    let result = state
        .tools
        .execute(ctx, &params.name, params.arguments)
        .await;
    rpc_response(JsonRpcResponse::success(id, json!(result)))
}

async fn handle_resource_read(
    state: &AppState,
    id: Option<RequestId>,
    params: Option<Value>,
) -> Response {
    let params: ReadResourceParams = match parse_params(params) {
        Ok(params) => params,
        Err(response) => return rpc_response(JsonRpcResponse::failure(id, response)),
    };

    match state
        .resources
        .read(state.resource_context(), &params.uri)
        .await
    {
        Ok(response) => {
            let body = JsonRpcResponse::success(
                id,
                json!(ResourceReadResult::json(&params.uri, &response.value)),
            );
            let mut headers = HeaderMap::new();
            if let Some(cache_headers) = &response.headers {
                if let Ok(value) = HeaderValue::from_str(&cache_headers.cache_control) {
                    headers.insert(CACHE_CONTROL, value);
                }
                if let Some(age) = cache_headers.age_seconds {
                    if let Ok(value) = HeaderValue::from_str(&age.to_string()) {
                        headers.insert(AGE, value);
                    }
                }
            }
            (StatusCode::OK, headers, Json(body)).into_response()
        }
        Err(error) => rpc_error_response(StatusCode::OK, id, &error),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| JsonRpcError {
        code: -32602,
        message: format!("invalid params: {}", e),
        data: None,
    })
}

fn accept_allows_json(accept: &str) -> bool {
    accept.split(',').any(|part| {
        let media = part.split(';').next().unwrap_or("").trim();
        media == "application/json" || media == "*/*" || media == "application/*"
    })
}

fn rpc_response(response: JsonRpcResponse) -> Response {
    (StatusCode::OK, Json(response)).into_response()
}

/// Render a taxonomy error as a JSON-RPC error body.
fn rpc_error_response(
    status: StatusCode,
    id: Option<RequestId>,
    error: &GatewayError,
) -> Response {
    let data = error.field_details().map(|details| {
        json!({
            "details": details
                .iter()
                .map(|d| json!({"field": d.field, "message": d.message}))
                .collect::<Vec<_>>()
        })
    });
    let body = JsonRpcResponse::failure(
        id,
        JsonRpcError {
            code: i64::from(error.status_code()),
            message: error.to_string(),
            data,
        },
    );
    (status, Json(body)).into_response()
}
