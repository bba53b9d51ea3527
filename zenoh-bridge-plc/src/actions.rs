//! Actions run on polled signal changes.
//!
//! Only changes observed by the poll loop trigger actions. Values written
//! through commands never do, so an action that writes cannot feed itself.

use async_trait::async_trait;
use tracing::{debug, warn};

use plclink_common::{BridgeEvent, Command, CommandMessage, EventSource, SignalValue};

use crate::config::ActionConfig;
use crate::dispatcher::DispatcherHandle;
use crate::events::Subscription;

/// Reaction to a polled change.
#[async_trait]
pub trait SignalAction: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this action cares about `signal`.
    fn matches(&self, signal: &str) -> bool;

    async fn on_change(&self, signal: &str, value: SignalValue);
}

/// Writes every polled change of one signal into another.
pub struct MirrorAction {
    name: String,
    from: String,
    to: String,
    handle: DispatcherHandle,
}

impl MirrorAction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, handle: DispatcherHandle) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            name: format!("mirror:{}->{}", from, to),
            from,
            to,
            handle,
        }
    }
}

#[async_trait]
impl SignalAction for MirrorAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, signal: &str) -> bool {
        signal == self.from
    }

    async fn on_change(&self, _signal: &str, value: SignalValue) {
        let raw = match value {
            SignalValue::Bool(b) => serde_json::Value::from(b),
            SignalValue::Word(w) => serde_json::Value::from(w),
        };
        let reply = self
            .handle
            .submit(CommandMessage::new(Command::WriteSignal {
                signal: self.to.clone(),
                value: raw,
            }))
            .await;

        if !reply.ok {
            warn!(
                action = %self.name,
                code = reply.code.as_deref().unwrap_or("unknown"),
                error = reply.error.as_deref().unwrap_or(""),
                "Mirror write failed"
            );
        }
    }
}

/// Build the configured actions of a connection.
pub fn from_config(actions: &[ActionConfig], handle: &DispatcherHandle) -> Vec<Box<dyn SignalAction>> {
    actions
        .iter()
        .map(|action| match action {
            ActionConfig::Mirror { from, to } => {
                Box::new(MirrorAction::new(from.as_str(), to.as_str(), handle.clone()))
                    as Box<dyn SignalAction>
            }
        })
        .collect()
}

/// Feeds polled changes to actions on its own task.
pub struct ActionRunner {
    actions: Vec<Box<dyn SignalAction>>,
}

impl ActionRunner {
    pub fn new(actions: Vec<Box<dyn SignalAction>>) -> Self {
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run until the subscription ends.
    pub async fn run(self, mut events: Subscription) {
        while let Some(event) = events.recv().await {
            let BridgeEvent::Change(change) = event else {
                continue;
            };
            if change.source != EventSource::Poll {
                continue;
            }

            for action in self.actions.iter().filter(|a| a.matches(&change.name)) {
                debug!(action = action.name(), signal = %change.name, "Running action");
                action.on_change(&change.name, change.value).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use plclink_common::ChangeEvent;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<(String, SignalValue)>>>,
    }

    #[async_trait]
    impl SignalAction for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn matches(&self, signal: &str) -> bool {
            signal.starts_with("door")
        }

        async fn on_change(&self, signal: &str, value: SignalValue) {
            self.seen.lock().unwrap().push((signal.to_string(), value));
        }
    }

    #[tokio::test]
    async fn test_only_polled_matching_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let runner = ActionRunner::new(vec![Box::new(Recorder { seen: seen.clone() })]);

        let bus = EventBus::new(16);
        let sub = bus.subscribe();
        bus.publish(ChangeEvent::new("door_1", SignalValue::Bool(true), EventSource::Poll));
        bus.publish(ChangeEvent::new("door_1", SignalValue::Bool(false), EventSource::Write));
        bus.publish(ChangeEvent::new("temp", SignalValue::Word(3), EventSource::Poll));
        bus.close();

        runner.run(sub).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("door_1".to_string(), SignalValue::Bool(true))]);
    }

    #[test]
    fn test_from_config() {
        let (handle, _rx) = crate::dispatcher::Dispatcher::channel(1);
        let actions = from_config(
            &[ActionConfig::Mirror {
                from: "start".into(),
                to: "lamp".into(),
            }],
            &handle,
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name(), "mirror:start->lamp");
        assert!(actions[0].matches("start"));
        assert!(!actions[0].matches("lamp"));
    }
}
