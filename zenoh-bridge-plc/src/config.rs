//! Configuration for the PLC bridge.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use plclink_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, ZenohConfig};
use plclink_common::{KEY_PREFIX, SignalDef};

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlcBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Payload encoding for published events and replies
    #[serde(default)]
    pub serialization: Format,

    /// PLC-specific settings
    #[serde(default)]
    pub plc: PlcConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge-wide PLC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Key expression prefix (default: "plclink")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Time allowed for a graceful shutdown before teardown is forced
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// PLC endpoints; each one runs as an independent bridge
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            connections: Vec::new(),
        }
    }
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// Configuration for a single PLC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection name (used in key expressions)
    #[serde(default = "default_connection_name")]
    pub name: String,

    /// PLC host (IP or hostname)
    #[serde(default)]
    pub host: String,

    /// Modbus/TCP port
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus unit/slave ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Poll cycle period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// First reconnect delay after a failed connect
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound of the reconnect backoff
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,

    /// Connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Period of the status event
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Bound on joining the worker tasks at shutdown
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Read contiguous addresses of one kind in a single request
    #[serde(default)]
    pub batch_reads: bool,

    /// Publish a change event for the first value read of each signal
    #[serde(default)]
    pub emit_initial: bool,

    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Poll the in-memory simulated device instead of a real PLC
    #[serde(default)]
    pub simulate: bool,

    /// Where signal definitions come from
    #[serde(default)]
    pub source: SignalSourceConfig,

    /// Actions run on polled changes
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

fn default_connection_name() -> String {
    "plc".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_max_retry_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_status_interval_secs() -> u64 {
    10
}

fn default_join_timeout_ms() -> u64 {
    3000
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: default_connection_name(),
            host: String::new(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            status_interval_secs: default_status_interval_secs(),
            join_timeout_ms: default_join_timeout_ms(),
            batch_reads: false,
            emit_initial: false,
            queue_capacity: default_queue_capacity(),
            simulate: false,
            source: SignalSourceConfig::default(),
            actions: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// `host:port` for logs.
    pub fn endpoint(&self) -> String {
        if self.simulate {
            format!("simulated:{}", self.name)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Source of signal definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalSourceConfig {
    /// Definitions embedded in this file
    Inline {
        #[serde(default)]
        signals: Vec<SignalDef>,
    },
    /// A JSON5 file, re-read on every reload
    File { path: PathBuf },
    /// A Zenoh queryable answering with the catalog
    Zenoh {
        key: String,
        #[serde(default = "default_query_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

impl Default for SignalSourceConfig {
    fn default() -> Self {
        SignalSourceConfig::Inline {
            signals: Vec::new(),
        }
    }
}

/// An action triggered by polled changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionConfig {
    /// Copy every polled change of `from` into the writable signal `to`
    Mirror { from: String, to: String },
}

impl BridgeConfig for PlcBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.plc.key_prefix
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.plc.key_prefix.trim().is_empty() {
            return Err(BridgeError::validation("plc.key_prefix cannot be empty"));
        }

        if self.plc.connections.is_empty() {
            return Err(BridgeError::validation(
                "At least one PLC connection must be configured",
            ));
        }

        let mut names = HashSet::new();
        for conn in &self.plc.connections {
            if conn.name.trim().is_empty() {
                return Err(BridgeError::validation("Connection name cannot be empty"));
            }

            if !names.insert(conn.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate connection name '{}'",
                    conn.name
                )));
            }

            if !conn.simulate && conn.host.trim().is_empty() {
                return Err(BridgeError::validation(format!(
                    "Connection '{}': host is required (or enable simulate)",
                    conn.name
                )));
            }

            if conn.poll_interval_ms == 0 {
                return Err(BridgeError::validation(format!(
                    "Connection '{}': poll_interval_ms must be positive",
                    conn.name
                )));
            }

            if conn.queue_capacity == 0 {
                return Err(BridgeError::validation(format!(
                    "Connection '{}': queue_capacity must be positive",
                    conn.name
                )));
            }

            if conn.max_retry_interval_ms < conn.retry_interval_ms {
                return Err(BridgeError::validation(format!(
                    "Connection '{}': max_retry_interval_ms is below retry_interval_ms",
                    conn.name
                )));
            }

            if conn.join_timeout_ms >= self.plc.shutdown_grace_ms {
                return Err(BridgeError::validation(format!(
                    "Connection '{}': join_timeout_ms must be below shutdown_grace_ms ({})",
                    conn.name, self.plc.shutdown_grace_ms
                )));
            }

            if let SignalSourceConfig::Zenoh { key, .. } = &conn.source {
                if key.trim().is_empty() {
                    return Err(BridgeError::validation(format!(
                        "Connection '{}': zenoh source needs a key",
                        conn.name
                    )));
                }
            }

            for action in &conn.actions {
                let ActionConfig::Mirror { from, to } = action;
                if from == to {
                    return Err(BridgeError::validation(format!(
                        "Connection '{}': mirror action cannot target its own source '{}'",
                        conn.name, from
                    )));
                }
            }
        }

        Ok(())
    }
}

impl PlcBridgeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.plc.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::parse_config;

    #[test]
    fn test_parse_inline_config() {
        let json = r#"{
            zenoh: { mode: "peer" },
            plc: {
                connections: [
                    {
                        name: "plc01",
                        host: "192.168.1.10",
                        source: {
                            type: "inline",
                            signals: [
                                { name: "temp", address: 10, kind: "Holding Register" }
                            ]
                        }
                    }
                ]
            }
        }"#;

        let config: PlcBridgeConfig = parse_config(json).unwrap();
        config.validate().unwrap();

        let conn = &config.plc.connections[0];
        assert_eq!(config.plc.key_prefix, "plclink");
        assert_eq!(conn.port, 502);
        assert_eq!(conn.unit_id, 1);
        assert_eq!(conn.poll_interval(), Duration::from_millis(100));
        assert_eq!(conn.request_timeout(), Duration::from_secs(1));
        assert_eq!(conn.connect_timeout(), Duration::from_secs(5));
        assert_eq!(conn.status_interval(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));

        match &conn.source {
            SignalSourceConfig::Inline { signals } => assert_eq!(signals[0].name, "temp"),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_parse_file_and_zenoh_sources() {
        let json = r#"{
            serialization: "cbor",
            plc: {
                key_prefix: "factory",
                connections: [
                    { name: "a", host: "10.0.0.1", source: { type: "file", path: "signals.json5" } },
                    { name: "b", host: "10.0.0.2", source: { type: "zenoh", key: "catalog/b" },
                      actions: [ { type: "mirror", from: "start", to: "lamp" } ] }
                ]
            }
        }"#;

        let config: PlcBridgeConfig = parse_config(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.serialization, Format::Cbor);
        assert_eq!(
            config.plc.connections[0].source,
            SignalSourceConfig::File {
                path: PathBuf::from("signals.json5")
            }
        );
        assert_eq!(
            config.plc.connections[1].source,
            SignalSourceConfig::Zenoh {
                key: "catalog/b".to_string(),
                timeout_ms: 10_000
            }
        );
        assert_eq!(
            config.plc.connections[1].actions,
            vec![ActionConfig::Mirror {
                from: "start".to_string(),
                to: "lamp".to_string()
            }]
        );
    }

    #[test]
    fn test_validate_empty_connections() {
        let config: PlcBridgeConfig = parse_config("{}").unwrap();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_missing_host() {
        let json = r#"{ plc: { connections: [ { name: "plc01" } ] } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{ plc: { connections: [ { name: "plc01", simulate: true } ] } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let json = r#"{ plc: { connections: [
            { name: "plc01", host: "a" },
            { name: "plc01", host: "b" }
        ] } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_mirror_loop() {
        let json = r#"{ plc: { connections: [
            { name: "plc01", host: "a", actions: [ { type: "mirror", from: "x", to: "x" } ] }
        ] } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_join_timeout_fits_grace() {
        let json = r#"{ plc: {
            shutdown_grace_ms: 2000,
            connections: [ { name: "plc01", simulate: true, join_timeout_ms: 2000 } ]
        } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(ref m)) if m.contains("join_timeout_ms")
        ));

        let json = r#"{ plc: {
            shutdown_grace_ms: 2000,
            connections: [ { name: "plc01", simulate: true, join_timeout_ms: 1500 } ]
        } }"#;
        let config: PlcBridgeConfig = parse_config(json).unwrap();
        assert!(config.validate().is_ok());
    }
}
