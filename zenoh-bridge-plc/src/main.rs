//! Zenoh bridge for PLCs over Modbus/TCP.
//!
//! Polls the configured signals and mirrors them to Zenoh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use plclink_bridge_framework::{BridgeConfig, BridgeRunner, parse_with_default};
use zenoh_bridge_plc::cli::{DEFAULT_CONFIG, PlcArgs};
use zenoh_bridge_plc::config::{ConnectionConfig, PlcBridgeConfig};
use zenoh_bridge_plc::mock::MockDevice;
use zenoh_bridge_plc::sink::ZenohSink;
use zenoh_bridge_plc::source::{self, SignalSource};
use zenoh_bridge_plc::transport::{Connector, TcpConnector};
use zenoh_bridge_plc::ConnectionBridge;

/// Tick period of simulated devices.
const SIMULATION_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args: PlcArgs = parse_with_default(DEFAULT_CONFIG);

    let config = PlcBridgeConfig::load_with_overrides(
        &args.bridge.config,
        || args.defines_connection().then(PlcBridgeConfig::default),
        |config| args.apply(config),
    )
    .with_context(|| format!("Failed to load config from {:?}", args.bridge.config))?;

    let format = config.serialization;
    let grace = config.shutdown_grace();
    let connections = config.plc.connections.clone();

    let mut runner = BridgeRunner::new_with_args("plc", config, Some(&args.bridge))
        .await
        .context("Failed to start bridge")?
        .with_format(format)
        .with_status_publishing()
        .with_shutdown_grace(grace);

    info!(
        config = ?args.bridge.config,
        connections = connections.len(),
        "Starting zenoh-bridge-plc"
    );

    for conn in &connections {
        let connector = connector_for(conn, &mut runner).await;
        let signals = source::from_config(conn, runner.session().clone());
        let sink = ZenohSink::new(runner.publisher(), &conn.name);

        let bridge = match ConnectionBridge::start(conn, connector, signals, Some(sink)).await {
            Ok(bridge) => bridge,
            Err(e) => {
                error!(connection = %conn.name, error = %e, "Failed to start connection");
                if let Some(status) = runner.status_publisher() {
                    let _ = status
                        .publish_error(format!("connection '{}': {}", conn.name, e))
                        .await;
                }
                return Err(e).with_context(|| format!("Failed to start connection '{}'", conn.name));
            }
        };

        runner.on_shutdown(bridge.shutdown());
    }

    let metadata = serde_json::json!({
        "connections": connections
            .iter()
            .map(|c| serde_json::json!({ "name": c.name, "endpoint": c.endpoint() }))
            .collect::<Vec<_>>(),
    });

    runner
        .run_with_metadata(Some(metadata))
        .await
        .context("Bridge terminated with an error")
}

/// Real PLC, or a simulated one seeded from the inline catalog.
async fn connector_for(
    conn: &ConnectionConfig,
    runner: &mut BridgeRunner<PlcBridgeConfig>,
) -> Arc<dyn Connector> {
    if !conn.simulate {
        return Arc::new(TcpConnector::new(conn.host.clone(), conn.port, conn.unit_id));
    }

    let device = MockDevice::new();
    let catalog = source::from_config(conn, runner.session().clone());
    if let Ok(defs) = catalog.fetch_signal_definitions().await {
        device.seed(&defs);
    }
    runner.spawn(device.clone().simulate(SIMULATION_TICK));
    info!(connection = %conn.name, "Using simulated PLC");

    Arc::new(device)
}
