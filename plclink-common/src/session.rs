use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Build a native Zenoh configuration from ours.
pub fn zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    let mode_str = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(Error::Config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };

    zenoh_config
        .insert_json5("mode", &mode_str)
        .map_err(|e| Error::Config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        let endpoints_json = serde_json::to_string(&config.connect)?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set connect endpoints: {}", e)))?;
    }

    if !config.listen.is_empty() {
        let endpoints_json = serde_json::to_string(&config.listen)?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints_json)
            .map_err(|e| Error::Config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    Ok(zenoh_config)
}

/// Open a Zenoh session using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Zenoh session open");

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_mode_rejected() {
        let config = ZenohConfig {
            mode: "broker".to_string(),
            ..Default::default()
        };
        assert!(matches!(zenoh_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_config_builds() {
        let mut config = ZenohConfig::default();
        config.set_router("localhost", 7447);
        assert!(zenoh_config(&config).is_ok());
    }
}
