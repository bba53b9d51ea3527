//! PLC Link Common Library
//!
//! Shared types and utilities for the PLC bridge:
//!
//! - [`signal`] - Signal data model (`Signal`, `SignalDef`, `SignalKind`, `SignalValue`)
//! - [`event`] - Change and status events published by the bridge
//! - [`command`] - Inbound command protocol and replies
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders and parsers
//! - [`error`] - Error types

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod signal;

// Re-export commonly used types at the crate root
pub use command::{Command, CommandMessage, CommandReply, CommandResult};
pub use config::{LogFormat, LoggingConfig, ZenohConfig, parse_config, tcp_endpoint};
pub use error::{Error, Result};
pub use event::{
    BridgeEvent, ChangeEvent, ConnectionState, EventSource, StatusEvent, current_timestamp_millis,
};
pub use keyexpr::{
    KEY_PREFIX, KeyExprBuilder, all_signals_wildcard, bridge_status_key, parse_signal_key,
};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use signal::{Signal, SignalDef, SignalKind, SignalValue};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use plclink_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
