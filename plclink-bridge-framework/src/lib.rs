//! PLC Link Bridge Framework
//!
//! Process-level plumbing shared by bridges that publish to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, OS signals, graceful teardown)
//! - [`Publisher`] for publishing serialized values to Zenoh
//! - [`BridgeArgs`] for the common CLI arguments (with `PLC_BRIDGE_*` env fallbacks)
//! - [`BridgeStatus`] for the bridge-level status message
//!
//! # Example
//!
//! ```ignore
//! use plclink_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!
//!     runner.spawn(my_worker(runner.publisher()));
//!     runner.on_shutdown(async move { /* flush, disconnect */ });
//!
//!     // Run until Ctrl+C or SIGTERM
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::{BridgeArgs, parse_with_default};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::Publisher;
pub use runner::{BridgeRunner, DEFAULT_SHUTDOWN_GRACE, wait_for_shutdown_signal};
pub use status::{BridgeStatus, StatusPublisher};

// Re-export commonly used types from plclink-common
pub use plclink_common::{Format, LogFormat, LoggingConfig, ZenohConfig};
