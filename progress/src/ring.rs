//! Bounded per-operation event buffers for reconnection replay.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::event::Event;

/// Per-operation circular buffer plus an id index for after-id lookup.
///
/// Overflow overwrites the oldest entry without blocking; the evicted
/// entry's id is purged from the index so a reconnect with that id falls
/// back to a full replay.
pub struct EventRing {
    capacity: usize,
    rings: DashMap<String, Mutex<OperationRing>>,
}

struct OperationRing {
    /// FIFO of `(insertion_seq, event)`.
    entries: VecDeque<(u64, Event)>,
    /// event id -> insertion sequence.
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl OperationRing {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rings: DashMap::new(),
        }
    }

    /// Insert an event, evicting the oldest entry at capacity.
    pub fn add(&self, event: &Event) {
        let ring = self
            .rings
            .entry(event.operation_id.clone())
            .or_insert_with(|| Mutex::new(OperationRing::new()));
        let mut ring = ring.lock();

        if ring.entries.len() == self.capacity {
            if let Some((_, evicted)) = ring.entries.pop_front() {
                ring.index.remove(&evicted.id);
            }
        }

        let seq = ring.next_seq;
        ring.next_seq += 1;
        ring.index.insert(event.id.clone(), seq);
        ring.entries.push_back((seq, event.clone()));
    }

    /// Events strictly after `last_event_id`, in insertion order.
    ///
    /// An empty or unknown id (never existed, or already evicted) returns
    /// everything currently buffered: the client has lost synchronization
    /// and a full replay is the safe default.
    pub fn after(&self, operation_id: &str, last_event_id: &str) -> Vec<Event> {
        let Some(ring) = self.rings.get(operation_id) else {
            return Vec::new();
        };
        let ring = ring.lock();

        match ring.index.get(last_event_id) {
            Some(&seq) => ring
                .entries
                .iter()
                .filter(|(s, _)| *s > seq)
                .map(|(_, e)| e.clone())
                .collect(),
            None => ring.entries.iter().map(|(_, e)| e.clone()).collect(),
        }
    }

    /// Number of buffered events for an operation.
    pub fn len(&self, operation_id: &str) -> usize {
        self.rings
            .get(operation_id)
            .map(|r| r.lock().entries.len())
            .unwrap_or(0)
    }

    /// Drop an operation's buffer entirely.
    pub fn cleanup_operation(&self, operation_id: &str) {
        self.rings.remove(operation_id);
    }

    pub fn clear(&self) {
        self.rings.clear();
    }
}
