//! Connection state as seen by observers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where the lifecycle manager currently is. Exactly one value at a time;
/// only the manager writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No client, no timer.
    Disconnected,
    /// A client exists and `connect` is in flight. `attempt` counts from 1.
    Connecting { attempt: u32 },
    Connected,
    /// No client; the next attempt starts at `at`.
    ReconnectScheduled { at: DateTime<Utc>, attempt: u32 },
    /// Retry cap reached. Only a reconfigure or disconnect leaves this state.
    Failed { attempts: u32 },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectScheduled { .. } => "reconnecting",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

/// Snapshot published to the presentation layer on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleStatus {
    pub state: ConnectionState,
    /// Last error, cleared on a successful connect.
    pub last_error: Option<String>,
}

impl LifecycleStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// True when the manager has given up and is waiting for user action.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ConnectionState::Failed { .. })
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }
}
