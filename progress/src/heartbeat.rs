//! Per-subscription heartbeat emission.
//!
//! Heartbeats keep HTTP event streams alive and let clients detect dead
//! connections. They are delivered straight to each subscription's channel,
//! never recorded in the operation history or the replay ring, and never
//! advance operation state.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{Event, EventPayload};

pub struct HeartbeatEmitter {
    interval: Duration,
    /// Global heartbeat sequence, monotonically increasing across all
    /// subscriptions so every heartbeat id is unique.
    sequence: AtomicU64,
    next_registration: AtomicU64,
    targets: DashMap<u64, HeartbeatTarget>,
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct HeartbeatTarget {
    operation_id: String,
    sender: mpsc::Sender<Event>,
}

impl HeartbeatEmitter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sequence: AtomicU64::new(0),
            next_registration: AtomicU64::new(0),
            targets: DashMap::new(),
            stop: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the background tick loop. Called once by the tracker.
    pub fn start(self: &Arc<Self>) {
        let emitter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(emitter.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so subscribers
            // do not receive a heartbeat at registration time.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = emitter.stop.cancelled() => break,
                    _ = interval.tick() => emitter.tick(),
                }
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Register a subscription channel; returns the registration id.
    pub fn register(&self, operation_id: &str, sender: mpsc::Sender<Event>) -> u64 {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.targets.insert(
            id,
            HeartbeatTarget {
                operation_id: operation_id.to_string(),
                sender,
            },
        );
        id
    }

    pub fn unregister(&self, registration_id: u64) {
        self.targets.remove(&registration_id);
    }

    /// Emit one heartbeat to every live subscription.
    fn tick(&self) {
        let mut closed = Vec::new();
        for entry in self.targets.iter() {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let event = Event::new(
                entry.operation_id.clone(),
                sequence,
                EventPayload::Heartbeat { sequence },
            );
            match entry.sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Heartbeat dropped for operation '{}': subscription channel full",
                        entry.operation_id
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            debug!("Removing heartbeat target {}: channel closed", id);
            self.targets.remove(&id);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.targets.len()
    }

    pub fn shutdown(&self) {
        self.stop.cancel();
        self.targets.clear();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[tokio::test]
    async fn test_heartbeats_reach_registered_channels() {
        let emitter = Arc::new(HeartbeatEmitter::new(Duration::from_millis(10)));
        emitter.start();

        let (tx, mut rx) = mpsc::channel(8);
        emitter.register("op", tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), EventKind::Heartbeat);
        let (EventPayload::Heartbeat { sequence: s1 }, EventPayload::Heartbeat { sequence: s2 }) =
            (&first.payload, &second.payload)
        else {
            panic!("expected heartbeat payloads");
        };
        assert!(s2 > s1);
        assert_ne!(first.id, second.id);

        emitter.shutdown();
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let emitter = Arc::new(HeartbeatEmitter::new(Duration::from_millis(10)));
        emitter.start();

        let (tx, mut rx) = mpsc::channel(8);
        let id = emitter.register("op", tx);
        let _ = rx.recv().await.unwrap();
        emitter.unregister(id);
        assert_eq!(emitter.subscription_count(), 0);

        emitter.shutdown();
    }

    #[tokio::test]
    async fn test_closed_channels_are_pruned() {
        let emitter = Arc::new(HeartbeatEmitter::new(Duration::from_millis(10)));
        emitter.start();

        let (tx, rx) = mpsc::channel(1);
        emitter.register("op", tx);
        drop(rx);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(emitter.subscription_count(), 0);

        emitter.shutdown();
    }
}
