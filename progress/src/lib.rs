//! Long-running operation tracking for the MAAS MCP gateway.
//!
//! ## Modules
//!
//! - [`tracker`]: operation lifecycle, reporters and event fan-out
//! - [`ring`]: bounded per-operation replay buffers
//! - [`cancel`]: cancellation scopes and subscriber accounting
//! - [`heartbeat`]: per-subscription keep-alive events
//! - [`event`]: the event model and event-id codec

pub mod cancel;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod ring;
pub mod tracker;

pub use cancel::CancelRegistry;
pub use error::{ProgressError, ProgressResult};
pub use event::{
    generate_event_id, parse_event_id, Event, EventKind, EventPayload, LogLevel, OperationStatus,
    ParsedEventId,
};
pub use heartbeat::HeartbeatEmitter;
pub use ring::EventRing;
pub use tracker::{
    OperationFailure, OperationSnapshot, ProgressTracker, Reporter, Subscription, TrackerConfig,
};
