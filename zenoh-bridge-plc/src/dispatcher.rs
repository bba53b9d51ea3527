//! Command dispatcher: executes commands against one connection.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use plclink_common::{
    ChangeEvent, Command, CommandMessage, CommandReply, CommandResult, EventSource, SignalValue,
    StatusEvent,
};

use crate::error::PlcError;
use crate::events::EventBus;
use crate::poller::PollStats;
use crate::registry::SignalRegistry;
use crate::source::SignalSource;
use crate::transport::ModbusTransport;

/// A command plus where to send its reply.
#[derive(Debug)]
pub struct CommandRequest {
    pub message: CommandMessage,
    pub reply: Option<oneshot::Sender<CommandReply>>,
}

/// Sending side of the dispatcher's queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<CommandRequest>,
}

impl DispatcherHandle {
    /// Queue a command and wait for its reply.
    pub async fn submit(&self, message: CommandMessage) -> CommandReply {
        let id = message.id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommandRequest {
            message,
            reply: Some(reply_tx),
        };

        if self.tx.send(request).await.is_err() {
            return CommandReply::failure("shutting_down", "dispatcher is not running").with_id(id);
        }
        reply_rx.await.unwrap_or_else(|_| {
            CommandReply::failure("shutting_down", "dispatcher stopped before replying")
                .with_id(id)
        })
    }
}

/// Builds and publishes status events; shared by the dispatcher and the
/// periodic ticker.
#[derive(Clone)]
pub struct StatusReporter {
    name: String,
    registry: Arc<SignalRegistry>,
    transport: Arc<ModbusTransport>,
    events: EventBus,
    stats: Arc<PollStats>,
}

impl StatusReporter {
    /// Current status, without publishing it.
    pub fn snapshot(&self) -> StatusEvent {
        let state = self.transport.state();
        StatusEvent {
            connected: state.is_connected(),
            signal_count: self.registry.len(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            connection: self.name.clone(),
            state,
            last_poll: self.stats.last_poll(),
        }
    }

    /// Current status; also published to subscribers.
    pub fn publish(&self) -> StatusEvent {
        let event = self.snapshot();
        self.events.publish(event.clone());
        event
    }
}

/// Executes commands one at a time.
pub struct Dispatcher {
    name: String,
    registry: Arc<SignalRegistry>,
    transport: Arc<ModbusTransport>,
    events: EventBus,
    source: Arc<dyn SignalSource>,
    status: StatusReporter,
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<SignalRegistry>,
        transport: Arc<ModbusTransport>,
        events: EventBus,
        source: Arc<dyn SignalSource>,
        stats: Arc<PollStats>,
    ) -> Self {
        let name = name.into();
        let status = StatusReporter {
            name: name.clone(),
            registry: registry.clone(),
            transport: transport.clone(),
            events: events.clone(),
            stats,
        };
        Self {
            name,
            registry,
            transport,
            events,
            source,
            status,
        }
    }

    pub fn status_reporter(&self) -> StatusReporter {
        self.status.clone()
    }

    /// Create the queue feeding a dispatcher.
    pub fn channel(capacity: usize) -> (DispatcherHandle, mpsc::Receiver<CommandRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (DispatcherHandle { tx }, rx)
    }

    /// Execute a command and build its reply.
    pub async fn handle(&self, message: CommandMessage) -> CommandReply {
        let CommandMessage { id, command } = message;
        let name = command.as_str();

        match self.execute(command).await {
            Ok(result) => {
                debug!(connection = %self.name, command = name, "Command completed");
                CommandReply::success(result).with_id(id)
            }
            Err(e) => {
                warn!(connection = %self.name, command = name, error = %e, "Command failed");
                CommandReply::failure(e.code(), e.to_string()).with_id(id)
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Result<CommandResult, PlcError> {
        match command {
            Command::WriteSignal { signal, value } => self.write_signal(&signal, &value).await,
            Command::ReloadSignals => self.reload().await,
            Command::Status => Ok(CommandResult::Status(self.status.publish())),
            Command::ListSignals => Ok(CommandResult::Signals {
                signals: self.registry.all(),
            }),
        }
    }

    async fn write_signal(
        &self,
        name: &str,
        raw: &serde_json::Value,
    ) -> Result<CommandResult, PlcError> {
        let signal = self.registry.get(name)?;
        if !signal.kind.is_writable() {
            return Err(PlcError::UnsupportedOperation(format!(
                "'{}' is a {} and cannot be written",
                signal.name,
                signal.kind.label()
            )));
        }
        let value = SignalValue::coerce(signal.kind, raw)?;

        self.registry.begin_write(name)?;
        if let Err(e) = self.transport.write(&signal, value).await {
            self.registry.cancel_write(name);
            return Err(PlcError::write(name, e));
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let updated = self.registry.set_written(name, value, timestamp)?;
        info!(connection = %self.name, signal = %name, value = %value, "Signal written");

        self.events.publish(ChangeEvent::for_signal(
            &updated,
            value,
            timestamp,
            EventSource::Write,
        ));

        Ok(CommandResult::Written {
            signal: updated.name,
            value,
        })
    }

    async fn reload(&self) -> Result<CommandResult, PlcError> {
        let defs = self.source.fetch_signal_definitions().await?;
        let signal_count = self.registry.load(&defs)?;
        info!(
            connection = %self.name,
            source = %self.source.describe(),
            signals = signal_count,
            "Signals reloaded"
        );
        Ok(CommandResult::Reloaded { signal_count })
    }

    /// Serve requests until the queue closes or shutdown is raised.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<CommandRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(connection = %self.name, "Command dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let request = tokio::select! {
                request = rx.recv() => request,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(request) = request else {
                break;
            };

            let reply = self.handle(request.message).await;
            if let Some(tx) = request.reply {
                let _ = tx.send(reply);
            }
        }

        rx.close();
        while let Ok(request) = rx.try_recv() {
            if let Some(tx) = request.reply {
                let _ = tx.send(
                    CommandReply::failure("shutting_down", "bridge is shutting down")
                        .with_id(request.message.id),
                );
            }
        }

        debug!(connection = %self.name, "Command dispatcher stopped");
    }
}
