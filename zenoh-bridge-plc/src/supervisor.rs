//! Per-connection supervisor: wires the components together and owns
//! their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actions::{self, ActionRunner};
use crate::config::ConnectionConfig;
use crate::dispatcher::{Dispatcher, DispatcherHandle, StatusReporter};
use crate::error::PlcError;
use crate::events::EventBus;
use crate::poller::{PollConfig, PollEngine, PollStats, sleep_or_shutdown};
use crate::registry::SignalRegistry;
use crate::sink::ZenohSink;
use crate::source::SignalSource;
use crate::transport::{Connector, ModbusTransport, TransportOptions};

/// Queued commands per connection.
const COMMAND_QUEUE: usize = 64;

/// One running PLC connection.
pub struct ConnectionBridge {
    name: String,
    registry: Arc<SignalRegistry>,
    transport: Arc<ModbusTransport>,
    events: EventBus,
    handle: DispatcherHandle,
    status: StatusReporter,
    stats: Arc<PollStats>,
    shutdown: watch::Sender<bool>,
    join_timeout: Duration,
    /// Stop on the shutdown flag.
    workers: Vec<(&'static str, JoinHandle<()>)>,
    /// Stop when the event bus closes.
    consumers: Vec<(&'static str, JoinHandle<()>)>,
}

impl ConnectionBridge {
    /// Load the catalog, then start every task of the connection.
    ///
    /// Failing to load the first catalog is fatal. Failing to reach the PLC
    /// is not; the poll engine keeps retrying.
    pub async fn start(
        config: &ConnectionConfig,
        connector: Arc<dyn Connector>,
        source: Arc<dyn SignalSource>,
        sink: Option<ZenohSink>,
    ) -> Result<Self, PlcError> {
        let name = config.name.clone();

        let defs = source.fetch_signal_definitions().await?;
        let registry = Arc::new(SignalRegistry::new());
        let count = registry.load(&defs)?;
        info!(
            connection = %name,
            source = %source.describe(),
            signals = count,
            "Signals loaded"
        );

        let transport = Arc::new(ModbusTransport::new(
            name.clone(),
            connector,
            TransportOptions {
                connect_timeout: config.connect_timeout(),
                request_timeout: config.request_timeout(),
                batch_reads: config.batch_reads,
            },
        ));
        if let Err(e) = transport.connect().await {
            warn!(connection = %name, error = %e, "Initial connect failed, will retry");
        }

        let events = EventBus::new(config.queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let poller = PollEngine::new(
            name.clone(),
            registry.clone(),
            transport.clone(),
            events.clone(),
            PollConfig::from(config),
        );
        let stats = poller.stats();

        let dispatcher = Dispatcher::new(
            name.clone(),
            registry.clone(),
            transport.clone(),
            events.clone(),
            source,
            stats.clone(),
        );
        let status = dispatcher.status_reporter();
        let (handle, command_rx) = Dispatcher::channel(COMMAND_QUEUE);

        // Subscribe before anything can publish
        let runner = ActionRunner::new(actions::from_config(&config.actions, &handle));
        let action_events = (!runner.is_empty()).then(|| events.subscribe());
        let sink_events = sink.as_ref().map(|_| events.subscribe());

        let mut workers = vec![
            ("poller", tokio::spawn(poller.run(shutdown_rx.clone()))),
            (
                "dispatcher",
                tokio::spawn(dispatcher.run(command_rx, shutdown_rx.clone())),
            ),
            (
                "status",
                tokio::spawn(status_ticker(
                    status.clone(),
                    config.status_interval(),
                    shutdown_rx.clone(),
                )),
            ),
        ];
        let mut consumers = Vec::new();

        if let Some(subscription) = action_events {
            consumers.push(("actions", tokio::spawn(runner.run(subscription))));
        }

        if let (Some(sink), Some(subscription)) = (sink, sink_events) {
            consumers.push(("sink", tokio::spawn(sink.clone().run_events(subscription))));

            let commands = handle.clone();
            let stop = shutdown_rx.clone();
            let connection = name.clone();
            workers.push((
                "commands",
                tokio::spawn(async move {
                    if let Err(e) = sink.run_commands(commands, stop).await {
                        warn!(connection = %connection, error = %e, "Command listener failed");
                    }
                }),
            ));
        }

        info!(
            connection = %name,
            endpoint = %config.endpoint(),
            poll_interval_ms = config.poll_interval_ms,
            "Connection bridge started"
        );

        Ok(Self {
            name,
            registry,
            transport,
            events,
            handle,
            status,
            stats,
            shutdown,
            join_timeout: config.join_timeout(),
            workers,
            consumers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<ModbusTransport> {
        &self.transport
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Submit commands to this connection.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> &Arc<PollStats> {
        &self.stats
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Stop every task, close the PLC session, then close the event bus.
    pub async fn shutdown(self) {
        info!(connection = %self.name, "Stopping connection bridge");

        let deadline = Instant::now() + self.join_timeout;

        let _ = self.shutdown.send(true);
        join_all(&self.name, self.workers, deadline).await;

        self.transport.disconnect().await;
        self.events.close();
        join_all(&self.name, self.consumers, deadline).await;

        info!(
            connection = %self.name,
            events = self.events.published(),
            "Connection bridge stopped"
        );
    }
}

async fn join_all(connection: &str, tasks: Vec<(&'static str, JoinHandle<()>)>, deadline: Instant) {
    for (task, mut handle) in tasks {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => debug!(connection = %connection, task, "Task finished"),
            Ok(Err(e)) => warn!(connection = %connection, task, error = %e, "Task panicked"),
            Err(_) => {
                warn!(connection = %connection, task, "Task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

async fn status_ticker(
    status: StatusReporter,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if period.is_zero() {
        return;
    }

    while !sleep_or_shutdown(period, &mut shutdown).await {
        status.publish();
    }
}
