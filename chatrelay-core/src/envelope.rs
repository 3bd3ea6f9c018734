//! Versioned wrapper for events pushed to the presentation layer.

use serde::Serialize;

use crate::event::ChatMessage;
use crate::lifecycle::LifecycleStatus;

/// What the presentation layer is told about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A message was appended to the log.
    Message(ChatMessage),
    /// The lifecycle status changed.
    Status(LifecycleStatus),
}

/// Versioned envelope around every [`RelayEvent`].
///
/// Fields:
/// - `version`: Schema version (always 1 for now).
/// - `seq`: Monotonically increasing per pipeline.
/// - `timestamp_ms`: UTC milliseconds when the envelope was created.
/// - `event`: The payload.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub version: u32,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub event: RelayEvent,
}

impl EventEnvelope {
    pub fn new(seq: u64, event: RelayEvent) -> Self {
        Self {
            version: 1,
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
