//! Zenoh bridge for PLCs over Modbus/TCP.
//!
//! Each configured connection polls a catalog of named signals (contacts,
//! coils, input registers and holding registers), publishes their changes to
//! Zenoh and accepts write/reload/status commands back.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/<connection>/signal/<name>   change events
//! <prefix>/<connection>/@/status        periodic status
//! <prefix>/<connection>/@/commands      inbound commands
//! <prefix>/<connection>/@/replies       command replies
//! <prefix>/@/status                     bridge status
//! ```
//!
//! # Components
//!
//! One [`supervisor::ConnectionBridge`] per connection owns a
//! [`registry::SignalRegistry`], a [`transport::ModbusTransport`], a
//! [`poller::PollEngine`], a [`dispatcher::Dispatcher`] and an
//! [`events::EventBus`] that fans events out to the Zenoh
//! [`sink::ZenohSink`] and the configured [`actions`].

pub mod actions;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mock;
pub mod poller;
pub mod registry;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod transport;

pub use config::{ConnectionConfig, PlcBridgeConfig};
pub use error::{PlcError, SourceError, TransportError};
pub use supervisor::ConnectionBridge;
