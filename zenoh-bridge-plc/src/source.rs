//! Where signal definitions come from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use plclink_common::{SignalDef, decode_auto};

use crate::config::{ConnectionConfig, SignalSourceConfig};
use crate::error::SourceError;
use crate::mock::demo_signals;

/// Supplies the signal catalog on startup and on every reload.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Fetch the full catalog. An empty catalog is an error.
    async fn fetch_signal_definitions(&self) -> Result<Vec<SignalDef>, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Definitions embedded in the bridge configuration.
#[derive(Debug, Clone)]
pub struct InlineSource {
    signals: Vec<SignalDef>,
}

impl InlineSource {
    pub fn new(signals: Vec<SignalDef>) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl SignalSource for InlineSource {
    async fn fetch_signal_definitions(&self) -> Result<Vec<SignalDef>, SourceError> {
        non_empty(self.signals.clone())
    }

    fn describe(&self) -> String {
        "inline".to_string()
    }
}

/// A catalog file, either a bare list or `{ signals: [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Catalog {
    List(Vec<SignalDef>),
    Wrapped { signals: Vec<SignalDef> },
}

impl Catalog {
    fn into_signals(self) -> Vec<SignalDef> {
        match self {
            Catalog::List(signals) | Catalog::Wrapped { signals } => signals,
        }
    }
}

/// A JSON5 file read again on every fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SignalSource for FileSource {
    async fn fetch_signal_definitions(&self) -> Result<Vec<SignalDef>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        let catalog: Catalog =
            json5::from_str(&content).map_err(|e| SourceError::Parse(e.to_string()))?;
        non_empty(catalog.into_signals())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Queries a Zenoh key for the catalog and takes the first valid reply.
pub struct ZenohSource {
    session: Arc<zenoh::Session>,
    key: String,
    timeout: Duration,
}

impl ZenohSource {
    pub fn new(session: Arc<zenoh::Session>, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            session,
            key: key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SignalSource for ZenohSource {
    async fn fetch_signal_definitions(&self) -> Result<Vec<SignalDef>, SourceError> {
        let replies = self
            .session
            .get(self.key.as_str())
            .timeout(self.timeout)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let payload = sample.payload().to_bytes();
                    let catalog: Catalog =
                        decode_auto(&payload).map_err(|e| SourceError::Parse(e.to_string()))?;
                    return non_empty(catalog.into_signals());
                }
                Err(err) => {
                    debug!(key = %self.key, error = ?err, "Catalog query returned an error reply");
                }
            }
        }

        Err(SourceError::Timeout {
            key: self.key.clone(),
            timeout: self.timeout,
        })
    }

    fn describe(&self) -> String {
        format!("zenoh:{}", self.key)
    }
}

fn non_empty(signals: Vec<SignalDef>) -> Result<Vec<SignalDef>, SourceError> {
    if signals.is_empty() {
        Err(SourceError::Empty)
    } else {
        Ok(signals)
    }
}

/// Build the source configured for a connection.
///
/// A simulated connection without inline signals gets the demo catalog.
pub fn from_config(
    config: &ConnectionConfig,
    session: Arc<zenoh::Session>,
) -> Arc<dyn SignalSource> {
    match &config.source {
        SignalSourceConfig::Inline { signals } if signals.is_empty() && config.simulate => {
            Arc::new(InlineSource::new(demo_signals()))
        }
        SignalSourceConfig::Inline { signals } => Arc::new(InlineSource::new(signals.clone())),
        SignalSourceConfig::File { path } => Arc::new(FileSource::new(path.clone())),
        SignalSourceConfig::Zenoh { key, timeout_ms } => Arc::new(ZenohSource::new(
            session,
            key.clone(),
            Duration::from_millis(*timeout_ms),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::SignalKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_inline_empty_is_error() {
        let source = InlineSource::new(Vec::new());
        assert!(matches!(
            source.fetch_signal_definitions().await,
            Err(SourceError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_file_list_and_wrapped() {
        let list = temp_file(
            r#"[ { name: "temp", address: 10, kind: "Holding Register" } ]"#,
        );
        let wrapped = temp_file(
            r#"{
                // catalog exported by the HMI
                signals: [
                    { name: "start", modbus_address: "0", signal_type: "Digital Input Contact" },
                    { name: "lamp", address: 1, kind: "Digital Output Coil" },
                ],
            }"#,
        );

        let defs = FileSource::new(list.path()).fetch_signal_definitions().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].parse_kind().unwrap(), SignalKind::HoldingRegister);

        let defs = FileSource::new(wrapped.path())
            .fetch_signal_definitions()
            .await
            .unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].parse_address().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_errors() {
        let missing = FileSource::new("/nonexistent/signals.json5");
        assert!(matches!(
            missing.fetch_signal_definitions().await,
            Err(SourceError::Io { .. })
        ));

        let garbage = temp_file("{ not json");
        assert!(matches!(
            FileSource::new(garbage.path()).fetch_signal_definitions().await,
            Err(SourceError::Parse(_))
        ));

        let empty = temp_file("[]");
        assert!(matches!(
            FileSource::new(empty.path()).fetch_signal_definitions().await,
            Err(SourceError::Empty)
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(InlineSource::new(Vec::new()).describe(), "inline");
        assert_eq!(
            FileSource::new("/etc/plc/signals.json5").describe(),
            "file:/etc/plc/signals.json5"
        );
    }
}
