//! Server-sent event streams for operation subscriptions.
//!
//! Each frame carries the tracker-generated event id in the SSE `id`
//! field, so clients reconnect with `Last-Event-ID` and replay from the
//! ring. Heartbeats flow through to keep intermediaries from closing the
//! connection.

use std::io;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use mmg_progress::{Event, EventPayload, Subscription};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::SharedState;
use crate::error::GatewayError;

pub async fn operation_events(
    State(state): State<SharedState>,
    Path(operation_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let caller = CancellationToken::new();
    let subscription = match state.tracker.subscribe(
        &operation_id,
        caller.clone(),
        last_event_id.as_deref(),
    ) {
        Ok(subscription) => subscription,
        Err(e) => {
            let error: GatewayError = e.into();
            return (
                StatusCode::from_u16(error.status_code().min(599))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                error.envelope_text(),
            )
                .into_response();
        }
    };
    debug!(
        "SSE subscriber attached to '{}' (last_event_id: {:?})",
        operation_id, last_event_id
    );

    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(64);
    tokio::spawn(pump_events(subscription, tx, caller));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|e| {
            error!("Failed to build SSE response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Copy subscription events into the HTTP body until the stream ends, the
/// client goes away, or a terminal event has been delivered.
async fn pump_events(
    mut subscription: Subscription,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    caller: CancellationToken,
) {
    while let Some(event) = subscription.next().await {
        let terminal = is_terminal_event(&event);
        if tx.send(Ok(format_sse_event(&event))).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }
    // Detach the subscription so the tracker's subscriber count drops.
    caller.cancel();
}

/// `id: <event id>\nevent: <kind>\ndata: <json>\n\n`
fn format_sse_event(event: &Event) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.id,
        event.kind(),
        data
    ))
}

/// The stream ends after the last event of a finished operation: the
/// completion payload, the error payload, or a bare cancelled status.
fn is_terminal_event(event: &Event) -> bool {
    match &event.payload {
        EventPayload::Completion { .. } | EventPayload::Error { .. } => true,
        EventPayload::Status { current, .. } => {
            matches!(current, mmg_progress::OperationStatus::Cancelled)
        }
        _ => false,
    }
}
