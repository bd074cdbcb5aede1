//! Operation lifecycle tracking and event fan-out.
//!
//! The tracker owns one record per operation (status, progress, result,
//! full event history), a broadcast fan-out channel feeding per-subscriber
//! forwarders, and the supporting ring buffer, cancellation registry and
//! heartbeat emitter. Events for one operation are emitted under that
//! operation's lock, so the history, the ring and every subscriber observe
//! the same total order.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
};
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cancel::CancelRegistry,
    error::{ProgressError, ProgressResult},
    event::{Event, EventPayload, LogLevel, OperationStatus},
    heartbeat::HeartbeatEmitter,
    ring::EventRing,
};

/// Tunables for the tracker; defaults match the gateway's env defaults.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Capacity of the fan-out channel, each subscription channel, and the
    /// per-operation replay ring.
    pub event_buffer_size: usize,
    pub heartbeat_interval: Duration,
    pub disconnect_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 100,
            heartbeat_interval: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// Terminal failure details recorded on the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub message: String,
    pub code: i64,
}

/// Read-only copy of an operation record.
#[derive(Debug, Clone)]
pub struct OperationSnapshot {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub progress: u8,
    pub result: Option<Value>,
    pub error: Option<OperationFailure>,
}

struct OperationState {
    id: String,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: OperationStatus,
    progress: u8,
    result: Option<Value>,
    error: Option<OperationFailure>,
    /// Append-only history, kept beyond the ring for audit and `get_events`.
    events: Vec<Event>,
    fanout: broadcast::Sender<Event>,
    event_seq: u64,
}

struct TrackerInner {
    config: TrackerConfig,
    ops: DashMap<String, Arc<Mutex<OperationState>>>,
    ring: EventRing,
    cancels: CancelRegistry,
    heartbeats: Arc<HeartbeatEmitter>,
    shut_down: AtomicBool,
}

impl TrackerInner {
    fn state(&self, operation_id: &str) -> ProgressResult<Arc<Mutex<OperationState>>> {
        self.ops
            .get(operation_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ProgressError::OperationNotFound(operation_id.to_string()))
    }

    /// Emit an event under the operation lock: append to the history,
    /// insert into the ring, offer to the fan-out channel.
    fn emit(&self, state: &mut OperationState, payload: EventPayload) -> Event {
        state.event_seq += 1;
        let event = Event::new(state.id.clone(), state.event_seq, payload);
        state.updated_at = event.timestamp;
        state.events.push(event.clone());
        self.ring.add(&event);
        // Send only fails when no subscriber is attached, which is fine.
        let _ = state.fanout.send(event.clone());
        event
    }

    /// Mark the record cancelled and emit the terminal status event, unless
    /// the operation already reached a terminal state.
    fn mark_cancelled(&self, operation_id: &str, message: &str) {
        let Ok(state) = self.state(operation_id) else {
            return;
        };
        let mut state = state.lock();
        if state.status.is_terminal() {
            return;
        }
        let previous = state.status;
        state.status = OperationStatus::Cancelled;
        state.progress = 100;
        self.emit(
            &mut state,
            EventPayload::Status {
                previous: Some(previous),
                current: OperationStatus::Cancelled,
                message: message.to_string(),
                details: None,
            },
        );
    }
}

/// Process-wide tracker for long-running operations.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new(mut config: TrackerConfig) -> Self {
        config.event_buffer_size = config.event_buffer_size.max(1);
        let heartbeats = Arc::new(HeartbeatEmitter::new(config.heartbeat_interval));
        heartbeats.start();
        Self {
            inner: Arc::new(TrackerInner {
                ring: EventRing::new(config.event_buffer_size),
                cancels: CancelRegistry::new(config.disconnect_timeout),
                heartbeats,
                shut_down: AtomicBool::new(false),
                ops: DashMap::new(),
                config,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    /// Begin tracking an operation.
    ///
    /// Returns the reporter used to emit events and the operation's
    /// cancellation scope, which the handler threads through every
    /// upstream call. Fails with `OperationExists` on id collision.
    pub fn start_operation(
        &self,
        operation_id: &str,
    ) -> ProgressResult<(Reporter, CancellationToken)> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(ProgressError::Shutdown);
        }

        let now = Utc::now();
        let (fanout, _) = broadcast::channel(self.inner.config.event_buffer_size);
        let state = OperationState {
            id: operation_id.to_string(),
            started_at: now,
            updated_at: now,
            status: OperationStatus::Initializing,
            progress: 0,
            result: None,
            error: None,
            events: Vec::new(),
            fanout,
            event_seq: 0,
        };

        match self.inner.ops.entry(operation_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ProgressError::OperationExists(operation_id.to_string()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(state)));
            }
        }

        let token = self.inner.cancels.register(operation_id);

        {
            let state = self.inner.state(operation_id)?;
            let mut state = state.lock();
            self.inner.emit(
                &mut state,
                EventPayload::Status {
                    previous: None,
                    current: OperationStatus::Initializing,
                    message: "operation started".to_string(),
                    details: None,
                },
            );
        }

        // Watch the scope so drain-timeout and registry-level cancels land
        // in the record as a terminal status.
        let watcher_inner = Arc::clone(&self.inner);
        let watcher_token = token.clone();
        let watcher_id = operation_id.to_string();
        tokio::spawn(async move {
            watcher_token.cancelled().await;
            watcher_inner.mark_cancelled(&watcher_id, "operation scope cancelled");
        });

        debug!("Started tracking operation '{}'", operation_id);
        Ok((
            Reporter {
                inner: Arc::clone(&self.inner),
                operation_id: operation_id.to_string(),
            },
            token,
        ))
    }

    /// Read-only snapshot of the operation record.
    pub fn get_operation(&self, operation_id: &str) -> ProgressResult<OperationSnapshot> {
        let state = self.inner.state(operation_id)?;
        let state = state.lock();
        Ok(OperationSnapshot {
            id: state.id.clone(),
            started_at: state.started_at,
            updated_at: state.updated_at,
            status: state.status,
            progress: state.progress,
            result: state.result.clone(),
            error: state.error.clone(),
        })
    }

    /// Copy of the full event history (not bounded by the ring).
    pub fn get_events(&self, operation_id: &str) -> ProgressResult<Vec<Event>> {
        let state = self.inner.state(operation_id)?;
        let state = state.lock();
        Ok(state.events.clone())
    }

    /// Attach a subscriber stream to an operation.
    ///
    /// The stream closes when either the caller's token or the operation's
    /// scope fires. With `last_event_id`, ring events after that id are
    /// delivered before any live event; an empty or unknown id yields a
    /// full replay of the ring.
    pub fn subscribe(
        &self,
        operation_id: &str,
        caller_token: CancellationToken,
        last_event_id: Option<&str>,
    ) -> ProgressResult<Subscription> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(ProgressError::Shutdown);
        }
        let state = self.inner.state(operation_id)?;
        let (tx, rx) = mpsc::channel(self.inner.config.event_buffer_size);

        // Snapshot the replay batch and attach to the fan-out under the
        // operation lock, so no event can fall between the two.
        let (replay, fanout_rx) = {
            let state = state.lock();
            let replay = match last_event_id {
                Some(id) => self.inner.ring.after(operation_id, id),
                None => Vec::new(),
            };
            (replay, state.fanout.subscribe())
        };

        self.inner.cancels.client_connected(operation_id);
        let heartbeat_id = self.inner.heartbeats.register(operation_id, tx.clone());
        let op_token = self
            .inner
            .cancels
            .token(operation_id)
            .unwrap_or_else(CancellationToken::new);

        tokio::spawn(forward_events(
            Arc::clone(&self.inner),
            operation_id.to_string(),
            replay,
            fanout_rx,
            tx,
            caller_token,
            op_token,
            heartbeat_id,
        ));

        Ok(Subscription {
            operation_id: operation_id.to_string(),
            stream: ReceiverStream::new(rx),
        })
    }

    /// Cancel an operation: terminal `cancelled` status plus scope cancel.
    /// Idempotent.
    pub fn cancel_operation(&self, operation_id: &str) -> ProgressResult<()> {
        // Ensure the operation exists so callers get a proper error.
        self.inner.state(operation_id)?;
        self.inner.mark_cancelled(operation_id, "operation cancelled");
        self.inner.cancels.cancel(operation_id);
        Ok(())
    }

    /// Forget an operation entirely: close its fan-out, drop the record,
    /// the ring buffer and the cancellation bookkeeping.
    pub fn cleanup_operation(&self, operation_id: &str) -> ProgressResult<()> {
        let removed = self.inner.ops.remove(operation_id);
        self.inner.cancels.cleanup(operation_id);
        self.inner.ring.cleanup_operation(operation_id);
        match removed {
            Some(_) => Ok(()),
            None => Err(ProgressError::OperationNotFound(operation_id.to_string())),
        }
    }

    /// Cancel everything and stop accepting work.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.ops.clear();
        self.inner.cancels.shutdown();
        self.inner.heartbeats.shutdown();
        self.inner.ring.clear();
    }

    /// Subscriber count for an operation, if tracked.
    pub fn subscriber_count(&self, operation_id: &str) -> Option<usize> {
        self.inner.cancels.subscriber_count(operation_id)
    }

    /// Ids of all currently tracked operations.
    pub fn operation_ids(&self) -> Vec<String> {
        self.inner.ops.iter().map(|e| e.key().clone()).collect()
    }
}

/// Copies fan-out events into one subscription's channel, replay first.
#[allow(clippy::too_many_arguments)]
async fn forward_events(
    inner: Arc<TrackerInner>,
    operation_id: String,
    replay: Vec<Event>,
    mut fanout_rx: broadcast::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    caller_token: CancellationToken,
    op_token: CancellationToken,
    heartbeat_id: u64,
) {
    let mut open = true;

    // The replay batch is at most one ring's worth, which fits the empty
    // subscription channel, so try_send only fails if the consumer is gone.
    for event in replay {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Dropping replay event {} for '{}': subscription channel full",
                    event.id, operation_id
                );
            }
            Err(TrySendError::Closed(_)) => {
                open = false;
                break;
            }
        }
    }

    while open {
        tokio::select! {
            _ = caller_token.cancelled() => open = false,
            _ = op_token.cancelled() => open = false,
            _ = tx.closed() => open = false,
            received = fanout_rx.recv() => match received {
                Ok(event) => match tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        warn!(
                            "Dropping event {} for '{}': subscription channel full",
                            event.id, operation_id
                        );
                    }
                    Err(TrySendError::Closed(_)) => open = false,
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription for '{}' lagged, {} events skipped",
                        operation_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => open = false,
            },
        }
    }

    inner.heartbeats.unregister(heartbeat_id);
    inner.cancels.client_disconnected(&operation_id);
    debug!("Subscription for '{}' closed", operation_id);
}

/// Live event stream for one operation.
pub struct Subscription {
    operation_id: String,
    stream: ReceiverStream<Event>,
}

impl Subscription {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

/// Capability object for emitting events on one operation.
///
/// All methods except `log` refuse to run once the operation reached a
/// terminal state, returning `OperationFinalized`.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<TrackerInner>,
    operation_id: String,
}

impl Reporter {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Emit a progress event; transitions the operation to `in_progress`
    /// first if it is not there already. Percent is clamped so the emitted
    /// sequence stays non-decreasing.
    pub fn progress(
        &self,
        percent: u8,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> ProgressResult<()> {
        let message = message.into();
        let state = self.inner.state(&self.operation_id)?;
        let mut state = state.lock();
        if state.status.is_terminal() {
            return Err(ProgressError::OperationFinalized(self.operation_id.clone()));
        }

        if state.status != OperationStatus::InProgress {
            let previous = state.status;
            state.status = OperationStatus::InProgress;
            self.inner.emit(
                &mut state,
                EventPayload::Status {
                    previous: Some(previous),
                    current: OperationStatus::InProgress,
                    message: message.clone(),
                    details: None,
                },
            );
        }

        let percent = percent.min(100).max(state.progress);
        state.progress = percent;
        self.inner.emit(
            &mut state,
            EventPayload::Progress {
                current: OperationStatus::InProgress,
                percent,
                message,
                details,
            },
        );
        Ok(())
    }

    /// Emit a log event. Permitted in any state, including terminal ones;
    /// never changes status or progress.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        source: impl Into<String>,
        details: Option<Value>,
    ) -> ProgressResult<()> {
        let state = self.inner.state(&self.operation_id)?;
        let mut state = state.lock();
        self.inner.emit(
            &mut state,
            EventPayload::Log {
                level,
                message: message.into(),
                source: source.into(),
                details,
            },
        );
        Ok(())
    }

    /// Emit an explicit status transition. Rejects terminal operations and
    /// transitions to the current status.
    pub fn status(
        &self,
        previous: OperationStatus,
        current: OperationStatus,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> ProgressResult<()> {
        let state = self.inner.state(&self.operation_id)?;
        let mut state = state.lock();
        if state.status.is_terminal() || current == state.status {
            return Err(ProgressError::OperationFinalized(self.operation_id.clone()));
        }
        state.status = current;
        self.inner.emit(
            &mut state,
            EventPayload::Status {
                previous: Some(previous),
                current,
                message: message.into(),
                details,
            },
        );
        Ok(())
    }

    /// Finalize successfully: `status -> complete` then a completion event
    /// carrying the result payload.
    pub fn complete(&self, result: Value, message: impl Into<String>) -> ProgressResult<()> {
        let message = message.into();
        let state = self.inner.state(&self.operation_id)?;
        let mut state = state.lock();
        if state.status.is_terminal() {
            return Err(ProgressError::OperationFinalized(self.operation_id.clone()));
        }

        let previous = state.status;
        state.status = OperationStatus::Complete;
        state.progress = 100;
        state.result = Some(result.clone());
        state.error = None;
        self.inner.emit(
            &mut state,
            EventPayload::Status {
                previous: Some(previous),
                current: OperationStatus::Complete,
                message: message.clone(),
                details: None,
            },
        );
        let elapsed_seconds =
            (Utc::now() - state.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.inner.emit(
            &mut state,
            EventPayload::Completion {
                result,
                message,
                elapsed_seconds,
            },
        );
        Ok(())
    }

    /// Finalize with an error: `status -> failed` then an error event.
    pub fn fail(
        &self,
        message: impl Into<String>,
        code: i64,
        details: Option<Value>,
        recoverable: bool,
    ) -> ProgressResult<()> {
        let message = message.into();
        let state = self.inner.state(&self.operation_id)?;
        let mut state = state.lock();
        if state.status.is_terminal() {
            return Err(ProgressError::OperationFinalized(self.operation_id.clone()));
        }

        let previous = state.status;
        state.status = OperationStatus::Failed;
        state.progress = 100;
        state.error = Some(OperationFailure {
            message: message.clone(),
            code,
        });
        self.inner.emit(
            &mut state,
            EventPayload::Status {
                previous: Some(previous),
                current: OperationStatus::Failed,
                message: message.clone(),
                details: None,
            },
        );
        self.inner.emit(
            &mut state,
            EventPayload::Error {
                message,
                code,
                details,
                recoverable,
            },
        );
        Ok(())
    }
}
