//! Operation event model and the event-id codec.
//!
//! Every event emitted for an operation carries a deterministic, parseable
//! id of the form `{operation_id}:{kind}:{timestamp_nanos}:{sequence}`.
//! The `(timestamp_nanos, sequence)` pair totally orders events within an
//! operation, which is what reconnecting clients rely on for replay.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Initializing,
    InProgress,
    Paused,
    Complete,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Terminal statuses are absorbing: no further transitions are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Discriminant of an event payload, used in event ids and SSE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Progress,
    Log,
    Heartbeat,
    Completion,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Progress => "progress",
            Self::Log => "log",
            Self::Heartbeat => "heartbeat",
            Self::Completion => "completion",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Self::Status),
            "progress" => Some(Self::Progress),
            "log" => Some(Self::Log),
            "heartbeat" => Some(Self::Heartbeat),
            "completion" => Some(Self::Completion),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Status {
        /// Previous status; `None` for the very first event of an operation.
        previous: Option<OperationStatus>,
        current: OperationStatus,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Progress {
        /// Always `in_progress` while progress events are being emitted.
        current: OperationStatus,
        percent: u8,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Log {
        level: LogLevel,
        message: String,
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Heartbeat {
        sequence: u64,
    },
    Completion {
        result: Value,
        message: String,
        elapsed_seconds: f64,
    },
    Error {
        message: String,
        code: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        recoverable: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status { .. } => EventKind::Status,
            Self::Progress { .. } => EventKind::Progress,
            Self::Log { .. } => EventKind::Log,
            Self::Heartbeat { .. } => EventKind::Heartbeat,
            Self::Completion { .. } => EventKind::Completion,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// A single event emitted for an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub operation_id: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Build an event stamped with the current wall clock and a generated id.
    pub fn new(operation_id: impl Into<String>, sequence: u64, payload: EventPayload) -> Self {
        let operation_id = operation_id.into();
        let timestamp = Utc::now();
        let id = generate_event_id(&operation_id, payload.kind(), &timestamp, sequence);
        Self {
            operation_id,
            id,
            timestamp,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Components of a parsed event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEventId {
    pub operation_id: String,
    pub kind: EventKind,
    pub timestamp_nanos: i64,
    pub sequence: u64,
}

/// Format: `{operation_id}:{kind}:{timestamp_nanos}:{sequence}`.
pub fn generate_event_id(
    operation_id: &str,
    kind: EventKind,
    timestamp: &DateTime<Utc>,
    sequence: u64,
) -> String {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
    format!("{}:{}:{}:{}", operation_id, kind, nanos, sequence)
}

/// Parse an event id back into its components.
///
/// Splits from the right so operation ids containing `:` stay intact.
pub fn parse_event_id(id: &str) -> Option<ParsedEventId> {
    let mut parts = id.rsplitn(4, ':');
    let sequence: u64 = parts.next()?.parse().ok()?;
    let timestamp_nanos: i64 = parts.next()?.parse().ok()?;
    let kind = EventKind::parse(parts.next()?)?;
    let operation_id = parts.next()?;
    if operation_id.is_empty() {
        return None;
    }
    Some(ParsedEventId {
        operation_id: operation_id.to_string(),
        kind,
        timestamp_nanos,
        sequence,
    })
}
