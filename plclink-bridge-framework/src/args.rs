//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
///
/// Every flag falls back to a `PLC_BRIDGE_*` environment variable, so the
/// bridge can be configured entirely from the environment in containers.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(about = "PLC Link bridge")]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "PLC_BRIDGE_CONFIG")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, env = "PLC_BRIDGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Zenoh router host; switches the session to client mode.
    #[arg(long, env = "PLC_BRIDGE_SINK_HOST")]
    pub sink_host: Option<String>,

    /// Zenoh router port (used with --sink-host).
    #[arg(long, env = "PLC_BRIDGE_SINK_PORT", default_value_t = 7447)]
    pub sink_port: u16,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If neither `--config` nor `PLC_BRIDGE_CONFIG` is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        parse_with_default(default_config)
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Apply the sink overrides to a Zenoh configuration.
    pub fn apply_sink(&self, zenoh: &mut plclink_common::ZenohConfig) {
        if let Some(ref host) = self.sink_host {
            zenoh.set_router(host, self.sink_port);
        }
    }
}

/// Parse any argument struct that has a `config` argument, defaulting it.
///
/// Bridges with their own flags flatten [`BridgeArgs`] into a larger parser
/// and use this to keep the same default-config behaviour.
pub fn parse_with_default<A: Parser>(default_config: &'static str) -> A {
    let matches = A::command()
        .mut_arg("config", |arg| arg.default_value(default_config))
        .get_matches();

    A::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::ZenohConfig;

    #[test]
    fn test_parse_flags() {
        let args = BridgeArgs::try_parse_from([
            "bridge",
            "--config",
            "test.json5",
            "--log-level",
            "debug",
            "--sink-host",
            "broker",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("test.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.sink_host.as_deref(), Some("broker"));
        assert_eq!(args.sink_port, 7447);
    }

    #[test]
    fn test_apply_sink() {
        let args = BridgeArgs {
            config: PathBuf::from("x.json5"),
            sink_host: Some("10.0.0.5".to_string()),
            sink_port: 7448,
            ..Default::default()
        };

        let mut zenoh = ZenohConfig::default();
        args.apply_sink(&mut zenoh);
        assert_eq!(zenoh.mode, "client");
        assert_eq!(zenoh.connect, vec!["tcp/10.0.0.5:7448"]);

        let mut untouched = ZenohConfig::default();
        BridgeArgs::default().apply_sink(&mut untouched);
        assert_eq!(untouched, ZenohConfig::default());
    }
}
