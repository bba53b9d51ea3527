use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::signal::{Signal, SignalValue};

/// What caused a change event.
///
/// Subscribers that write back to the PLC use this to avoid feedback loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Change observed by the poll loop.
    Poll,
    /// Value written through a command.
    Write,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Poll => "poll",
            EventSource::Write => "write",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Published whenever a signal's value changes or a write completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Signal name.
    pub name: String,

    /// Signal display name, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// New value.
    pub value: SignalValue,

    /// Unix epoch milliseconds of the change.
    pub timestamp: i64,

    /// Origin of the change.
    pub source: EventSource,
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    pub fn new(name: impl Into<String>, value: SignalValue, source: EventSource) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            value,
            timestamp: current_timestamp_millis(),
            source,
        }
    }

    /// Build an event for a signal record.
    pub fn for_signal(
        signal: &Signal,
        value: SignalValue,
        timestamp: i64,
        source: EventSource,
    ) -> Self {
        Self {
            name: signal.name.clone(),
            display_name: signal.display_name.clone(),
            value,
            timestamp,
            source,
        }
    }
}

/// State of the connection to a PLC endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session open.
    #[default]
    Disconnected,
    /// Connect attempt in progress.
    Connecting,
    /// Session open.
    Connected,
    /// Last connect attempt failed.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Periodic bridge status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Whether the PLC session is open.
    pub connected: bool,

    /// Number of registered signals.
    pub signal_count: usize,

    /// Unix epoch milliseconds when the status was taken.
    pub timestamp: i64,

    /// Connection name.
    pub connection: String,

    /// Detailed connection state.
    pub state: ConnectionState,

    /// Unix epoch milliseconds of the last successful poll cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<i64>,
}

/// Anything the event publisher fans out.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Change(ChangeEvent),
    Status(StatusEvent),
}

impl From<ChangeEvent> for BridgeEvent {
    fn from(event: ChangeEvent) -> Self {
        BridgeEvent::Change(event)
    }
}

impl From<StatusEvent> for BridgeEvent {
    fn from(event: StatusEvent) -> Self {
        BridgeEvent::Status(event)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
