//! Per-operation cancellation scopes and subscriber accounting.
//!
//! Each registered operation owns a parent-less [`CancellationToken`] that
//! tool handlers thread through their upstream calls. The registry counts
//! live subscribers; when the count drains to zero a one-shot grace timer
//! is armed, and only if nobody reconnects before it fires is the
//! operation's scope cancelled. Momentary reconnects are common, so the
//! grace period avoids killing work the user is still watching.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CancelRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    disconnect_timeout: Duration,
    ops: DashMap<String, Mutex<OpCancelState>>,
}

struct OpCancelState {
    token: CancellationToken,
    subscribers: usize,
    drain_timer: Option<JoinHandle<()>>,
}

impl CancelRegistry {
    pub fn new(disconnect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                disconnect_timeout,
                ops: DashMap::new(),
            }),
        }
    }

    /// Register an operation and return its cancellation scope.
    ///
    /// Re-registering an id replaces the previous scope; the tracker
    /// guarantees id uniqueness, so this only happens after cleanup.
    pub fn register(&self, operation_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.inner.ops.insert(
            operation_id.to_string(),
            Mutex::new(OpCancelState {
                token: token.clone(),
                subscribers: 0,
                drain_timer: None,
            }),
        );
        if let Some(previous) = previous {
            warn!("Replacing cancellation scope for operation '{}'", operation_id);
            let mut state = previous.lock();
            state.token.cancel();
            if let Some(timer) = state.drain_timer.take() {
                timer.abort();
            }
        }
        token
    }

    /// A subscriber attached: bump the count and disarm any drain timer.
    pub fn client_connected(&self, operation_id: &str) {
        let Some(entry) = self.inner.ops.get(operation_id) else {
            warn!("Client connected for unknown operation '{}'", operation_id);
            return;
        };
        let mut state = entry.lock();
        state.subscribers += 1;
        if let Some(timer) = state.drain_timer.take() {
            timer.abort();
            debug!("Disarmed drain timer for operation '{}'", operation_id);
        }
    }

    /// A subscriber detached: drop the count and arm the drain timer at zero.
    pub fn client_disconnected(&self, operation_id: &str) {
        let Some(entry) = self.inner.ops.get(operation_id) else {
            warn!(
                "Client disconnected for unknown operation '{}'",
                operation_id
            );
            return;
        };
        let mut state = entry.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers > 0 || state.token.is_cancelled() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let id = operation_id.to_string();
        let timeout = self.inner.disconnect_timeout;
        state.drain_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(entry) = inner.ops.get(&id) else {
                return;
            };
            let state = entry.lock();
            // Re-check: a reconnect may have raced the timer.
            if state.subscribers == 0 && !state.token.is_cancelled() {
                info!(
                    "No subscribers for operation '{}' after {:?}, cancelling",
                    id, timeout
                );
                state.token.cancel();
            }
        }));
        debug!("Armed drain timer for operation '{}'", operation_id);
    }

    /// Cancel an operation's scope immediately. Idempotent; returns whether
    /// this call performed the cancellation.
    pub fn cancel(&self, operation_id: &str) -> bool {
        let Some(entry) = self.inner.ops.get(operation_id) else {
            warn!("Cancel requested for unknown operation '{}'", operation_id);
            return false;
        };
        let mut state = entry.lock();
        if let Some(timer) = state.drain_timer.take() {
            timer.abort();
        }
        if state.token.is_cancelled() {
            false
        } else {
            state.token.cancel();
            true
        }
    }

    /// The operation's cancellation scope, if registered.
    pub fn token(&self, operation_id: &str) -> Option<CancellationToken> {
        self.inner
            .ops
            .get(operation_id)
            .map(|entry| entry.lock().token.clone())
    }

    /// Current subscriber count, if registered.
    pub fn subscriber_count(&self, operation_id: &str) -> Option<usize> {
        self.inner
            .ops
            .get(operation_id)
            .map(|entry| entry.lock().subscribers)
    }

    /// Cancel (if needed) and remove all bookkeeping for an operation.
    pub fn cleanup(&self, operation_id: &str) {
        if let Some((_, state)) = self.inner.ops.remove(operation_id) {
            let mut state = state.lock();
            if let Some(timer) = state.drain_timer.take() {
                timer.abort();
            }
            state.token.cancel();
        }
    }

    /// Cancel every registered operation and clear state.
    pub fn shutdown(&self) {
        for entry in self.inner.ops.iter() {
            let mut state = entry.lock();
            if let Some(timer) = state.drain_timer.take() {
                timer.abort();
            }
            state.token.cancel();
        }
        self.inner.ops.clear();
    }
}
