//! Poll engine: reads every signal each cycle and publishes changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use plclink_common::{ChangeEvent, EventSource};

use crate::config::ConnectionConfig;
use crate::error::PlcError;
use crate::events::EventBus;
use crate::registry::{SignalRegistry, UpdateOutcome};
use crate::transport::ModbusTransport;

/// Backoff multiplier applied after each failed connect.
const RETRY_BACKOFF: f64 = 1.5;

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
    /// Publish the first value read of each signal.
    pub emit_initial: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(30),
            emit_initial: false,
        }
    }
}

impl From<&ConnectionConfig> for PollConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            retry_interval: config.retry_interval(),
            max_retry_interval: config.max_retry_interval(),
            emit_initial: config.emit_initial,
        }
    }
}

/// Counters shared between the poll loop and status reporting.
#[derive(Debug, Default)]
pub struct PollStats {
    cycles: AtomicU64,
    slow_cycles: AtomicU64,
    read_errors: AtomicU64,
    events: AtomicU64,
    last_poll: AtomicI64,
}

impl PollStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn slow_cycles(&self) -> u64 {
        self.slow_cycles.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Change events emitted by polling.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Epoch milliseconds of the last complete cycle.
    pub fn last_poll(&self) -> Option<i64> {
        match self.last_poll.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Signals read successfully.
    pub read: usize,
    /// Change events emitted.
    pub changed: usize,
    /// Per-signal read failures.
    pub errors: usize,
    /// Reconnecting failed mid-cycle; the remaining signals were skipped.
    pub aborted: bool,
    /// A reload happened during the cycle; nothing was recorded.
    pub stale: bool,
}

/// Polls one connection.
pub struct PollEngine {
    name: String,
    registry: Arc<SignalRegistry>,
    transport: Arc<ModbusTransport>,
    events: EventBus,
    config: PollConfig,
    stats: Arc<PollStats>,
}

impl PollEngine {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<SignalRegistry>,
        transport: Arc<ModbusTransport>,
        events: EventBus,
        config: PollConfig,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            transport,
            events,
            config,
            stats: Arc::new(PollStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PollStats> {
        self.stats.clone()
    }

    /// Run until the shutdown flag is raised.
    ///
    /// In-flight I/O is never interrupted; the flag is checked between
    /// cycles and during sleeps.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            connection = %self.name,
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting poll engine"
        );

        let mut retry = self.config.retry_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.transport.connect().await {
                warn!(
                    connection = %self.name,
                    error = %e,
                    retry_ms = retry.as_millis() as u64,
                    "PLC unreachable, retrying"
                );
                if sleep_or_shutdown(retry, &mut shutdown).await {
                    break;
                }
                retry = next_retry(retry, self.config.max_retry_interval);
                continue;
            }
            retry = self.config.retry_interval;

            let started = Instant::now();
            let report = self.cycle().await;
            let elapsed = started.elapsed();

            if report.aborted {
                // Next iteration reconnects; don't spin while the PLC is down
                if sleep_or_shutdown(self.config.retry_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }

            match self.config.interval.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => {
                    if sleep_or_shutdown(remaining, &mut shutdown).await {
                        break;
                    }
                }
                _ => {
                    self.stats.slow_cycles.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        connection = %self.name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = self.config.interval.as_millis() as u64,
                        "Slow poll cycle"
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        info!(connection = %self.name, cycles = self.stats.cycles(), "Poll engine stopped");
    }

    /// Connect if needed, then run a single cycle.
    pub async fn poll_once(&self) -> Result<CycleReport, PlcError> {
        self.transport.connect().await.map_err(PlcError::Connection)?;
        Ok(self.cycle().await)
    }

    async fn cycle(&self) -> CycleReport {
        let (revision, signals) = self.registry.snapshot();
        let reads = self.transport.read_many(&signals).await;
        let timestamp = chrono::Utc::now().timestamp_millis();

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let mut report = CycleReport {
            read: reads.values.len(),
            errors: reads.errors.len(),
            aborted: reads.aborted.is_some(),
            ..Default::default()
        };

        for (signal, error) in reads.errors {
            self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
            let error = PlcError::read(&signal, error);
            warn!(connection = %self.name, code = error.code(), error = %error, "Read failed");
        }

        if let Some(ref error) = reads.aborted {
            warn!(
                connection = %self.name,
                error = %error,
                skipped = signals.len() - report.read - report.errors,
                "Connection lost during poll cycle"
            );
        }

        let Some(updates) = self.registry.apply_reads(revision, &reads.values, timestamp) else {
            debug!(connection = %self.name, "Signals reloaded during cycle, discarding reads");
            report.stale = true;
            return report;
        };

        for update in updates {
            let emit = match update.outcome {
                UpdateOutcome::Changed => true,
                UpdateOutcome::Initialized => self.config.emit_initial,
                UpdateOutcome::Unchanged | UpdateOutcome::NotFound => false,
            };
            let Some(value) = update.signal.value.filter(|_| emit) else {
                continue;
            };

            debug!(
                connection = %self.name,
                signal = %update.signal.name,
                value = %value,
                "Signal changed"
            );
            self.events.publish(ChangeEvent::for_signal(
                &update.signal,
                value,
                timestamp,
                EventSource::Poll,
            ));
            report.changed += 1;
        }

        self.stats
            .events
            .fetch_add(report.changed as u64, Ordering::Relaxed);
        if !report.aborted {
            self.stats.last_poll.store(timestamp, Ordering::Relaxed);
        }

        report
    }
}

fn next_retry(current: Duration, max: Duration) -> Duration {
    current.mul_f64(RETRY_BACKOFF).min(max)
}

/// Sleep for `duration`; returns `true` if shutdown was requested meanwhile.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
