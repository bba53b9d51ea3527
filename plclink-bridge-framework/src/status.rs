//! Bridge status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plclink_common::bridge_status_key;

use crate::Result;
use crate::publisher::Publisher;

/// Bridge-level status, published on `<prefix>/@/status`.
///
/// Connection-level status is published separately by each bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "plc").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// When the process started.
    pub started_at: DateTime<Utc>,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_status(
        bridge: impl Into<String>,
        version: impl Into<String>,
        status: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            started_at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "running", Utc::now())
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "offline", Utc::now())
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status to Zenoh.
    ///
    /// Publishes to `{key_prefix}/@/status`, always as JSON.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = bridge_status_key(publisher.key_prefix());
        publisher.publish_json(&key, self).await
    }
}

/// Helper to publish bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge_name: String,
    version: String,
    started_at: DateTime<Utc>,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Publisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
            started_at: Utc::now(),
        }
    }

    fn status(&self, state: &str) -> BridgeStatus {
        BridgeStatus::with_status(&self.bridge_name, &self.version, state, self.started_at)
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = self.status("running");
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        self.status("offline").publish(&self.publisher).await
    }

    /// Publish "error" status.
    pub async fn publish_error(&self, error: impl Into<String>) -> Result<()> {
        self.status("error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("plc", "0.1.0");
        assert_eq!(status.bridge, "plc");
        assert_eq!(status.status, "running");
    }

    #[test]
    fn test_status_with_metadata() {
        let status = BridgeStatus::running("plc", "0.1.0").with_metadata(serde_json::json!({
            "connections": ["plc01", "plc02"],
            "poll_interval_ms": 100
        }));

        assert_eq!(status.metadata["connections"][0], "plc01");
        assert_eq!(status.metadata["poll_interval_ms"], 100);
    }

    #[test]
    fn test_status_serialization() {
        let status = BridgeStatus::with_status("plc", "1.0.0", "error", Utc::now())
            .with_metadata(serde_json::json!({ "error": "first load failed" }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"bridge\":\"plc\""));
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"error\":\"first load failed\""));
        assert!(json.contains("\"started_at\""));
    }
}
