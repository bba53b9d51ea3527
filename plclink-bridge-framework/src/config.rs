//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, ZenohConfig};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use plclink_bridge_framework::{BridgeConfig, ZenohConfig, LoggingConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub plc: MyPlcConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn key_prefix(&self) -> &str {
///         &self.plc.key_prefix
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.plc.connections.is_empty() {
///             return Err(BridgeError::validation("At least one connection required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix for this bridge.
    fn key_prefix(&self) -> &str;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse a configuration file without validating it.
    fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Ok(json5::from_str(&content)?)
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, then apply command-line overrides before validating.
    ///
    /// When the file does not exist, `fallback` may supply a base configuration
    /// (typically `Default` when enough flags were given); returning `None`
    /// keeps the [`BridgeError::ConfigNotFound`] error.
    fn load_with_overrides<F, O>(path: impl AsRef<Path>, fallback: F, overrides: O) -> Result<Self>
    where
        F: FnOnce() -> Option<Self>,
        O: FnOnce(&mut Self),
    {
        let mut config = match Self::read(path) {
            Ok(config) => config,
            Err(BridgeError::ConfigNotFound { path }) => match fallback() {
                Some(config) => {
                    tracing::info!(path = %path, "Configuration file not found, using command-line settings");
                    config
                }
                None => return Err(BridgeError::ConfigNotFound { path }),
            },
            Err(e) => return Err(e),
        };

        overrides(&mut config);
        config.validate()?;

        Ok(config)
    }
}
