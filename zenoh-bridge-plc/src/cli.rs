//! Command-line interface of the bridge binary.

use std::path::PathBuf;

use clap::Parser;

use plclink_bridge_framework::BridgeArgs;

use crate::config::{ConnectionConfig, PlcBridgeConfig, SignalSourceConfig};

/// Default configuration file.
pub const DEFAULT_CONFIG: &str = "plcbridge.json5";

/// Zenoh bridge for PLCs over Modbus/TCP.
///
/// Flags override the configuration file; each one also reads a
/// `PLC_BRIDGE_*` environment variable.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "zenoh-bridge-plc")]
#[command(about = "Polls PLC signals over Modbus/TCP and mirrors them to Zenoh")]
#[command(version)]
pub struct PlcArgs {
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// PLC host (first connection).
    #[arg(long, env = "PLC_BRIDGE_PLC_HOST")]
    pub plc_host: Option<String>,

    /// PLC Modbus/TCP port (first connection).
    #[arg(long, env = "PLC_BRIDGE_PLC_PORT")]
    pub plc_port: Option<u16>,

    /// Poll interval in milliseconds (all connections).
    #[arg(long, env = "PLC_BRIDGE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// JSON5 signal catalog (first connection).
    #[arg(long, env = "PLC_BRIDGE_SIGNALS")]
    pub signals: Option<PathBuf>,

    /// Poll a simulated device instead of a real PLC (all connections).
    #[arg(long, env = "PLC_BRIDGE_SIMULATE")]
    pub simulate: bool,
}

impl PlcArgs {
    /// Whether the flags alone describe a usable connection.
    ///
    /// Used to run without a configuration file.
    pub fn defines_connection(&self) -> bool {
        self.plc_host.is_some() || self.simulate
    }

    /// Apply flag overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut PlcBridgeConfig) {
        self.bridge.apply_sink(&mut config.zenoh);

        if let Some(ref level) = self.bridge.log_level {
            config.logging.level = level.clone();
        }

        let targets_first =
            self.plc_host.is_some() || self.plc_port.is_some() || self.signals.is_some();
        if config.plc.connections.is_empty() && (targets_first || self.simulate) {
            config.plc.connections.push(ConnectionConfig::default());
        }

        if let Some(first) = config.plc.connections.first_mut() {
            if let Some(ref host) = self.plc_host {
                first.host = host.clone();
            }
            if let Some(port) = self.plc_port {
                first.port = port;
            }
            if let Some(ref path) = self.signals {
                first.source = SignalSourceConfig::File { path: path.clone() };
            }
        }

        for conn in &mut config.plc.connections {
            if let Some(interval) = self.poll_interval_ms {
                conn.poll_interval_ms = interval;
            }
            if self.simulate {
                conn.simulate = true;
            }
        }
    }
}
