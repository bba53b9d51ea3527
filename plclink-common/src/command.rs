//! Inbound command protocol.
//!
//! Commands arrive as JSON (or CBOR) objects on the connection's command key:
//!
//! ```json
//! {"command": "write_signal", "signal": "temp", "value": 80, "id": "req-1"}
//! {"command": "reload_signals"}
//! {"command": "status"}
//! {"command": "list_signals"}
//! ```
//!
//! Every command is answered with a [`CommandReply`] on the reply key.

use serde::{Deserialize, Serialize};

use crate::event::StatusEvent;
use crate::signal::{Signal, SignalValue};

/// A request to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Write a value to a coil or holding register.
    WriteSignal {
        /// Target signal name.
        #[serde(alias = "signal_name", alias = "name")]
        signal: String,
        /// Value to write, coerced to the signal's kind.
        value: serde_json::Value,
    },
    /// Re-fetch signal definitions from the configuration source.
    ReloadSignals,
    /// Report connection state, signal count and last poll time.
    #[serde(alias = "get_status")]
    Status,
    /// Return every registered signal with its current value.
    #[serde(alias = "get_signals")]
    ListSignals,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::WriteSignal { .. } => "write_signal",
            Command::ReloadSignals => "reload_signals",
            Command::Status => "status",
            Command::ListSignals => "list_signals",
        }
    }
}

/// A command together with an optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Echoed back in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub command: Command,
}

impl CommandMessage {
    pub fn new(command: Command) -> Self {
        Self { id: None, command }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Payload of a successful command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResult {
    /// A write completed.
    Written { signal: String, value: SignalValue },
    /// Signal definitions were reloaded.
    Reloaded { signal_count: usize },
    /// Current status.
    Status(StatusEvent),
    /// Registry snapshot.
    Signals { signals: Vec<Signal> },
}

/// Answer to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Correlation id copied from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Whether the command succeeded.
    pub ok: bool,

    /// Stable error code (`not_found`, `unsupported_operation`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human-readable error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, flatten)]
    pub result: Option<CommandResult>,
}

impl CommandReply {
    pub fn success(result: CommandResult) -> Self {
        Self {
            id: None,
            ok: true,
            code: None,
            error: None,
            result: Some(result),
        }
    }

    pub fn failure(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: None,
            ok: false,
            code: Some(code.into()),
            error: Some(error.into()),
            result: None,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}
