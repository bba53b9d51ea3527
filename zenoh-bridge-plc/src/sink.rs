//! Zenoh side of a connection: publishes events and receives commands.

use tokio::sync::watch;
use tracing::{debug, info, warn};
use zenoh::sample::SampleKind;

use plclink_bridge_framework::{BridgeError, Publisher};
use plclink_common::{BridgeEvent, CommandMessage, CommandReply, KeyExprBuilder, decode_auto};

use crate::dispatcher::DispatcherHandle;
use crate::events::Subscription;

/// Publishes one connection's events and serves its command key.
#[derive(Debug, Clone)]
pub struct ZenohSink {
    publisher: Publisher,
    keys: KeyExprBuilder,
}

impl ZenohSink {
    pub fn new(publisher: Publisher, connection: &str) -> Self {
        let keys = KeyExprBuilder::with_prefix(publisher.key_prefix(), connection);
        Self { publisher, keys }
    }

    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Publish a single event.
    pub async fn publish(&self, event: &BridgeEvent) -> Result<(), BridgeError> {
        match event {
            BridgeEvent::Change(change) => {
                self.publisher
                    .publish_to_key(&self.keys.signal_key(&change.name), change)
                    .await
            }
            BridgeEvent::Status(status) => {
                self.publisher
                    .publish_to_key(&self.keys.status_key(), status)
                    .await
            }
        }
    }

    /// Forward events until the subscription ends.
    pub async fn run_events(self, mut events: Subscription) {
        debug!(key_prefix = %self.keys.prefix(), "Event sink started");
        let mut published = 0u64;

        while let Some(event) = events.recv().await {
            match self.publish(&event).await {
                Ok(()) => published += 1,
                Err(e) => warn!(error = %e, "Failed to publish event"),
            }
        }

        debug!(published, dropped = events.dropped(), "Event sink stopped");
    }

    /// Serve the command key until shutdown.
    pub async fn run_commands(
        self,
        handle: DispatcherHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let key = self.keys.command_key();
        let subscriber = self
            .publisher
            .session()
            .declare_subscriber(&key)
            .await
            .map_err(|e| BridgeError::ZenohSession(format!("subscribe to {}: {}", key, e)))?;

        info!(key = %key, "Listening for commands");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                sample = subscriber.recv_async() => {
                    let sample = match sample {
                        Ok(sample) => sample,
                        Err(e) => {
                            warn!(error = %e, "Command subscriber closed");
                            break;
                        }
                    };
                    if sample.kind() == SampleKind::Delete {
                        continue;
                    }

                    let payload = sample.payload().to_bytes();
                    let reply = match decode_auto::<CommandMessage>(&payload) {
                        Ok(message) => {
                            debug!(command = message.command.as_str(), id = ?message.id, "Command received");
                            handle.submit(message).await
                        }
                        Err(e) => {
                            warn!(key = %sample.key_expr(), error = %e, "Invalid command payload");
                            CommandReply::failure("invalid_command", e.to_string())
                        }
                    };

                    if let Err(e) = self
                        .publisher
                        .publish_to_key(&self.keys.reply_key(), &reply)
                        .await
                    {
                        warn!(error = %e, "Failed to publish command reply");
                    }
                }
            }
        }

        if let Err(e) = subscriber.undeclare().await {
            debug!(error = %e, "Failed to undeclare command subscriber");
        }
        debug!(key = %key, "Command listener stopped");
        Ok(())
    }
}
