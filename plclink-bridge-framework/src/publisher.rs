//! Publisher for Zenoh.

use std::sync::Arc;

use serde::Serialize;

use plclink_common::{Format, encode};

use crate::error::{BridgeError, Result};

/// Publisher for sending bridge output to Zenoh.
///
/// Wraps a Zenoh session and serializes values with the configured
/// [`Format`] before putting them.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Build a full key expression from a suffix.
    pub fn build_key(&self, suffix: &str) -> String {
        join_key(&self.key_prefix, suffix)
    }

    /// Publish a value under the publisher's prefix.
    ///
    /// The key is constructed by appending `key_suffix` to the prefix.
    pub async fn publish<T: Serialize>(&self, key_suffix: &str, value: &T) -> Result<()> {
        let key = self.build_key(key_suffix);
        self.publish_to_key(&key, value).await
    }

    /// Publish a value with a full key (not using prefix).
    pub async fn publish_to_key<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload =
            encode(value, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(key, payload).await
    }

    /// Publish raw bytes to a key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a JSON value to a key, regardless of the configured format.
    pub async fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

fn join_key(prefix: &str, suffix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    match (prefix.is_empty(), suffix.is_empty()) {
        (_, true) => prefix.to_string(),
        (true, false) => suffix.to_string(),
        (false, false) => format!("{}/{}", prefix, suffix),
    }
}
