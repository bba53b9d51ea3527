//! Modbus transport: the only component that performs PLC I/O.
//!
//! [`ModbusTransport`] owns at most one session per connection behind an
//! async mutex, so there is never more than one request in flight. Sessions
//! come from a [`Connector`], which is a real TCP client in production and
//! the in-memory [`MockDevice`](crate::mock::MockDevice) in tests and
//! simulation mode.

pub mod tcp;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use plclink_common::{ConnectionState, Signal, SignalKind, SignalValue};

use crate::error::TransportError;

pub use tcp::TcpConnector;

/// Largest bit count in one read request.
pub const MAX_READ_BITS: u16 = 2000;

/// Largest register count in one read request.
pub const MAX_READ_WORDS: u16 = 125;

/// An open Modbus session.
#[async_trait]
pub trait ModbusSession: Send {
    /// Read `count` consecutive units of the table that backs `kind`.
    async fn read(
        &mut self,
        kind: SignalKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<SignalValue>, TransportError>;

    /// Write a single coil or holding register.
    async fn write(
        &mut self,
        kind: SignalKind,
        address: u16,
        value: SignalValue,
    ) -> Result<(), TransportError>;

    /// Close the session. Errors are ignored.
    async fn close(&mut self);
}

/// Opens sessions to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ModbusSession>, TransportError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Timeouts and read strategy of a transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub batch_reads: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
            batch_reads: false,
        }
    }
}

/// Outcome of reading a set of signals.
#[derive(Debug, Default)]
pub struct ReadReport {
    /// Values read, by signal name.
    pub values: Vec<(String, SignalValue)>,
    /// Signals whose read failed, including failures that closed the session.
    pub errors: Vec<(String, TransportError)>,
    /// Set when reconnecting failed; the remaining signals were not read.
    pub aborted: Option<TransportError>,
}

type SessionSlot = Option<Box<dyn ModbusSession>>;

/// Serialized access to one Modbus endpoint.
pub struct ModbusTransport {
    name: String,
    connector: Arc<dyn Connector>,
    session: Mutex<SessionSlot>,
    state: watch::Sender<ConnectionState>,
    options: TransportOptions,
}

impl ModbusTransport {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: TransportOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            connector,
            session: Mutex::new(None),
            state,
            options,
        }
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state, without waiting on in-flight I/O.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the session if it is not already open.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        self.open(&mut slot).await
    }

    /// Close the session. Safe to call when already closed.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.close().await;
            info!(connection = %self.name, "Disconnected from PLC");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Read one signal.
    pub async fn read(&self, signal: &Signal) -> Result<SignalValue, TransportError> {
        let values = self.read_range(signal.kind, signal.address, 1).await?;
        values
            .into_iter()
            .next()
            .map(|v| v.for_kind(signal.kind))
            .ok_or_else(|| TransportError::Io("empty response".to_string()))
    }

    /// Read consecutive units of one table.
    pub async fn read_range(
        &self,
        kind: SignalKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<SignalValue>, TransportError> {
        let mut slot = self.session.lock().await;
        if slot.is_none() {
            self.open(&mut slot).await?;
        }

        let timeout = self.options.request_timeout;
        let result = match &mut *slot {
            Some(session) => tokio::time::timeout(timeout, session.read(kind, address, count))
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout))),
            None => Err(TransportError::Connection("no session".to_string())),
        };

        match result {
            Ok(values) if values.len() < usize::from(count) => {
                Err(TransportError::Io(format!(
                    "short response: {} of {} values",
                    values.len(),
                    count
                )))
            }
            Ok(values) => Ok(values),
            Err(e) => {
                if e.drops_connection() {
                    self.drop_session(&mut slot, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Read every signal, batching contiguous addresses when enabled.
    ///
    /// Each request takes the session lock separately so that writes can
    /// interleave with a long poll cycle. A failed signal is recorded and
    /// skipped; if it closed the session the next request reconnects, and
    /// reading stops only when that reconnect fails.
    pub async fn read_many(&self, signals: &[Signal]) -> ReadReport {
        let mut report = ReadReport::default();

        if !self.options.batch_reads {
            for signal in signals {
                if !self.read_into(signal, &mut report).await {
                    break;
                }
            }
            return report;
        }

        'ranges: for range in plan_ranges(signals) {
            match self.read_range(range.kind, range.start, range.count).await {
                Ok(values) => {
                    for signal in range.signals {
                        let offset = usize::from(signal.address - range.start);
                        if let Some(value) = values.get(offset) {
                            report
                                .values
                                .push((signal.name.clone(), value.for_kind(signal.kind)));
                        }
                    }
                }
                Err(e @ TransportError::Connection(_)) => {
                    report.aborted = Some(e);
                    break;
                }
                Err(e) => {
                    debug!(
                        connection = %self.name,
                        kind = %range.kind,
                        start = range.start,
                        count = range.count,
                        error = %e,
                        "Batched read rejected, reading signals one by one"
                    );
                    for signal in range.signals {
                        if !self.read_into(signal, &mut report).await {
                            break 'ranges;
                        }
                    }
                }
            }
        }

        report
    }

    async fn read_into(&self, signal: &Signal, report: &mut ReadReport) -> bool {
        match self.read(signal).await {
            Ok(value) => {
                report.values.push((signal.name.clone(), value));
                true
            }
            Err(e @ TransportError::Connection(_)) => {
                report.aborted = Some(e);
                false
            }
            Err(e) => {
                report.errors.push((signal.name.clone(), e));
                true
            }
        }
    }

    /// Write a coil or holding register.
    pub async fn write(&self, signal: &Signal, value: SignalValue) -> Result<(), TransportError> {
        if !signal.kind.is_writable() {
            return Err(TransportError::UnsupportedOperation(format!(
                "'{}' is a {} and cannot be written",
                signal.name,
                signal.kind.label()
            )));
        }

        let value = value.for_kind(signal.kind);

        let mut slot = self.session.lock().await;
        if slot.is_none() {
            self.open(&mut slot).await?;
        }

        let timeout = self.options.request_timeout;
        let result = match &mut *slot {
            Some(session) => {
                tokio::time::timeout(timeout, session.write(signal.kind, signal.address, value))
                    .await
                    .unwrap_or(Err(TransportError::Timeout(timeout)))
            }
            None => Err(TransportError::Connection("no session".to_string())),
        };

        if let Err(ref e) = result {
            if e.drops_connection() {
                self.drop_session(&mut slot, e).await;
            }
        }

        result
    }

    async fn open(&self, slot: &mut MutexGuard<'_, SessionSlot>) -> Result<(), TransportError> {
        self.state.send_replace(ConnectionState::Connecting);
        let endpoint = self.connector.endpoint();

        let timeout = self.options.connect_timeout;
        let result = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Connection(format!(
                    "connect to {} timed out after {}ms",
                    endpoint,
                    timeout.as_millis()
                )))
            });

        match result {
            Ok(session) => {
                **slot = Some(session);
                self.state.send_replace(ConnectionState::Connected);
                info!(connection = %self.name, endpoint = %endpoint, "Connected to PLC");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Error);
                let e = match e {
                    TransportError::Connection(_) => e,
                    other => TransportError::Connection(other.to_string()),
                };
                debug!(connection = %self.name, endpoint = %endpoint, error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    async fn drop_session(&self, slot: &mut MutexGuard<'_, SessionSlot>, cause: &TransportError) {
        if let Some(mut session) = slot.take() {
            session.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        warn!(connection = %self.name, error = %cause, "PLC session lost");
    }
}

struct ReadRange<'a> {
    kind: SignalKind,
    start: u16,
    count: u16,
    signals: Vec<&'a Signal>,
}

/// Group signals into contiguous per-kind ranges within the PDU limits.
fn plan_ranges(signals: &[Signal]) -> Vec<ReadRange<'_>> {
    let mut by_kind: BTreeMap<SignalKind, Vec<&Signal>> = BTreeMap::new();
    for signal in signals {
        by_kind.entry(signal.kind).or_default().push(signal);
    }

    let mut ranges: Vec<ReadRange<'_>> = Vec::new();
    for (kind, mut group) in by_kind {
        group.sort_by_key(|s| s.address);
        let limit = if kind.is_digital() {
            MAX_READ_BITS
        } else {
            MAX_READ_WORDS
        };

        for signal in group {
            if let Some(range) = ranges.last_mut().filter(|r| r.kind == kind) {
                let end = u32::from(range.start) + u32::from(range.count);
                let address = u32::from(signal.address);
                if address < end {
                    range.signals.push(signal);
                    continue;
                }
                if address == end && range.count < limit {
                    range.count += 1;
                    range.signals.push(signal);
                    continue;
                }
            }
            ranges.push(ReadRange {
                kind,
                start: signal.address,
                count: 1,
                signals: vec![signal],
            });
        }
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn transport(device: &MockDevice, batch_reads: bool) -> ModbusTransport {
        ModbusTransport::new(
            "test",
            Arc::new(device.clone()),
            TransportOptions {
                connect_timeout: Duration::from_millis(200),
                request_timeout: Duration::from_millis(200),
                batch_reads,
            },
        )
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let device = MockDevice::new();
        let transport = transport(&device, false);

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();

        assert_eq!(device.connect_count(), 1);
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let device = MockDevice::new();
        let transport = transport(&device, false);

        transport.connect().await.unwrap();
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_read_reconnects_once() {
        let device = MockDevice::new();
        device.set(SignalKind::HoldingRegister, 10, SignalValue::Word(72));
        let transport = transport(&device, false);
        let temp = Signal::new("temp", 10, SignalKind::HoldingRegister);

        // Not connected yet: the read opens the session itself
        assert_eq!(transport.read(&temp).await.unwrap(), SignalValue::Word(72));
        assert_eq!(device.connect_count(), 1);

        device.set_offline(true);
        let err = transport.read(&temp).await.unwrap_err();
        assert!(err.drops_connection());
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        // Exactly one attempt, which fails
        let err = transport.read(&temp).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
        assert_eq!(transport.state(), ConnectionState::Error);

        device.set_offline(false);
        assert_eq!(transport.read(&temp).await.unwrap(), SignalValue::Word(72));
    }

    #[tokio::test]
    async fn test_exception_keeps_session() {
        let device = MockDevice::new();
        device.fail_address(SignalKind::HoldingRegister, 99);
        let transport = transport(&device, false);

        let err = transport
            .read(&Signal::new("bad", 99, SignalKind::HoldingRegister))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Exception(_)));
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(device.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_drops_session() {
        let device = MockDevice::new();
        let transport = transport(&device, false);
        transport.connect().await.unwrap();

        device.set_latency(Duration::from_secs(5));
        let err = transport
            .read(&Signal::new("slow", 1, SignalKind::AnalogInputRegister))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_write_rejects_read_only() {
        let device = MockDevice::new();
        let transport = transport(&device, false);

        let err = transport
            .write(
                &Signal::new("start", 0, SignalKind::DigitalInputContact),
                SignalValue::Bool(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedOperation(_)));
        assert!(device.writes().is_empty());
        assert_eq!(device.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_write_coil() {
        let device = MockDevice::new();
        let transport = transport(&device, false);
        let lamp = Signal::new("lamp", 3, SignalKind::DigitalOutputCoil);

        transport.write(&lamp, SignalValue::Word(1)).await.unwrap();
        assert_eq!(
            device.writes(),
            vec![(SignalKind::DigitalOutputCoil, 3, SignalValue::Bool(true))]
        );
        assert_eq!(transport.read(&lamp).await.unwrap(), SignalValue::Bool(true));
    }

    #[test]
    fn test_plan_ranges() {
        let signals = vec![
            Signal::new("c", 12, SignalKind::HoldingRegister),
            Signal::new("a", 10, SignalKind::HoldingRegister),
            Signal::new("b", 11, SignalKind::HoldingRegister),
            Signal::new("b2", 11, SignalKind::HoldingRegister),
            Signal::new("far", 40, SignalKind::HoldingRegister),
            Signal::new("bit", 10, SignalKind::DigitalInputContact),
        ];

        let ranges = plan_ranges(&signals);
        let shape: Vec<_> = ranges.iter().map(|r| (r.kind, r.start, r.count)).collect();
        assert_eq!(
            shape,
            vec![
                (SignalKind::DigitalInputContact, 10, 1),
                (SignalKind::HoldingRegister, 10, 3),
                (SignalKind::HoldingRegister, 40, 1),
            ]
        );
        assert_eq!(ranges[1].signals.len(), 4);
    }

    #[test]
    fn test_plan_ranges_respects_word_limit() {
        let signals: Vec<Signal> = (0..200u16)
            .map(|a| Signal::new(format!("r{}", a), a, SignalKind::AnalogInputRegister))
            .collect();

        let ranges = plan_ranges(&signals);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].count, MAX_READ_WORDS);
        assert_eq!(ranges[1].start, MAX_READ_WORDS);
        assert_eq!(ranges[1].count, 200 - MAX_READ_WORDS);
    }

    #[tokio::test]
    async fn test_batched_read_falls_back_on_exception() {
        let device = MockDevice::new();
        for address in 0..4u16 {
            device.set(
                SignalKind::HoldingRegister,
                address,
                SignalValue::Word(address * 10),
            );
        }
        device.fail_address(SignalKind::HoldingRegister, 2);
        let transport = transport(&device, true);

        let signals: Vec<Signal> = (0..4u16)
            .map(|a| Signal::new(format!("r{}", a), a, SignalKind::HoldingRegister))
            .collect();

        let report = transport.read_many(&signals).await;
        assert!(report.aborted.is_none());
        assert_eq!(report.values.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "r2");
        assert!(report.values.contains(&("r3".to_string(), SignalValue::Word(30))));
    }

    #[tokio::test]
    async fn test_batched_read_single_request() {
        let device = MockDevice::new();
        let transport = transport(&device, true);
        let signals: Vec<Signal> = (0..10u16)
            .map(|a| Signal::new(format!("b{}", a), a, SignalKind::DigitalOutputCoil))
            .collect();

        let report = transport.read_many(&signals).await;
        assert_eq!(report.values.len(), 10);
        assert_eq!(device.request_count(), 1);
    }

    #[tokio::test]
    async fn test_read_many_stops_when_reconnect_fails() {
        let device = MockDevice::new();
        let transport = transport(&device, false);
        transport.connect().await.unwrap();
        device.set_offline(true);

        let signals: Vec<Signal> = (0..5u16)
            .map(|a| Signal::new(format!("s{}", a), a, SignalKind::HoldingRegister))
            .collect();

        // s0 loses the session, s1 fails to reconnect, s2..s4 are skipped
        let report = transport.read_many(&signals).await;
        assert!(matches!(report.aborted, Some(TransportError::Connection(_))));
        assert!(report.values.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], (ref name, TransportError::Io(_)) if name == "s0"));
        assert_eq!(device.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_read_many_continues_past_dropped_signal() {
        let device = MockDevice::new();
        for address in 0..3u16 {
            device.set(SignalKind::HoldingRegister, address, SignalValue::Word(address));
        }
        device.drop_address(SignalKind::HoldingRegister, 1);

        let signals: Vec<Signal> = (0..3u16)
            .map(|a| Signal::new(format!("s{}", a), a, SignalKind::HoldingRegister))
            .collect();

        for batch_reads in [false, true] {
            let transport = transport(&device, batch_reads);
            let report = transport.read_many(&signals).await;

            assert!(report.aborted.is_none(), "batch_reads={}", batch_reads);
            assert_eq!(
                report.values,
                vec![
                    ("s0".to_string(), SignalValue::Word(0)),
                    ("s2".to_string(), SignalValue::Word(2)),
                ]
            );
            assert_eq!(report.errors.len(), 1);
            assert!(matches!(report.errors[0], (ref name, TransportError::Io(_)) if name == "s1"));
            assert_eq!(transport.state(), ConnectionState::Connected);
        }
    }
}
