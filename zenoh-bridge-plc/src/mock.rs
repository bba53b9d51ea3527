//! In-memory Modbus device.
//!
//! Backs `--simulate` and the test suites. Unmapped addresses read as
//! `false`/`0`; addresses marked with [`MockDevice::fail_address`] answer with
//! an exception, those marked with [`MockDevice::drop_address`] break the
//! session; [`MockDevice::set_offline`] refuses connections and breaks open
//! sessions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use plclink_common::{SignalDef, SignalKind, SignalValue};

use crate::error::TransportError;
use crate::transport::{Connector, ModbusSession};

type Cell = (SignalKind, u16);

#[derive(Debug, Default)]
struct DeviceState {
    values: HashMap<Cell, SignalValue>,
    scripts: HashMap<Cell, VecDeque<SignalValue>>,
    failing: HashSet<Cell>,
    dropping: HashSet<Cell>,
    offline: bool,
    latency: Duration,
    connects: usize,
    requests: usize,
    writes: Vec<(SignalKind, u16, SignalValue)>,
}

impl DeviceState {
    fn read(&mut self, cell: Cell) -> Result<SignalValue, TransportError> {
        if self.failing.contains(&cell) {
            return Err(TransportError::Exception("IllegalDataAddress".to_string()));
        }
        if self.dropping.contains(&cell) {
            return Err(TransportError::Io("no response".to_string()));
        }

        if let Some(script) = self.scripts.get_mut(&cell) {
            if let Some(next) = script.pop_front() {
                self.values.insert(cell, next);
            }
        }

        let default = SignalValue::Bool(false).for_kind(cell.0);
        Ok(self.values.entry(cell).or_insert(default).for_kind(cell.0))
    }
}

/// A simulated PLC, cheap to clone; clones share the same memory.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the value stored at an address.
    pub fn set(&self, kind: SignalKind, address: u16, value: SignalValue) {
        self.lock().values.insert((kind, address), value.for_kind(kind));
    }

    /// Value currently stored at an address.
    pub fn get(&self, kind: SignalKind, address: u16) -> Option<SignalValue> {
        self.lock().values.get(&(kind, address)).copied()
    }

    /// Queue values returned by successive reads; the last one sticks.
    pub fn script(&self, kind: SignalKind, address: u16, values: impl IntoIterator<Item = SignalValue>) {
        self.lock()
            .scripts
            .insert((kind, address), values.into_iter().collect());
    }

    /// Answer reads of this address with an exception.
    pub fn fail_address(&self, kind: SignalKind, address: u16) {
        self.lock().failing.insert((kind, address));
    }

    /// Answer reads of this address with an I/O error, closing the session.
    pub fn drop_address(&self, kind: SignalKind, address: u16) {
        self.lock().dropping.insert((kind, address));
    }

    /// Refuse connections and fail requests on open sessions.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every request.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of sessions opened so far.
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of read requests served.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(SignalKind, u16, SignalValue)> {
        self.lock().writes.clone()
    }

    /// Seed the device with the initial values of a catalog.
    pub fn seed(&self, defs: &[SignalDef]) {
        for def in defs {
            let (Ok(kind), Ok(address)) = (def.parse_kind(), def.parse_address()) else {
                continue;
            };
            if let Some(value) = def
                .value
                .as_ref()
                .and_then(|raw| SignalValue::coerce(kind, raw).ok())
            {
                self.set(kind, address, value);
            }
        }
    }

    /// Move the read-only inputs a little, so that a simulated bridge has
    /// something to publish.
    pub fn tick(&self) {
        let mut state = self.lock();
        for ((kind, _), value) in state.values.iter_mut() {
            *value = match (kind, *value) {
                (SignalKind::DigitalInputContact, SignalValue::Bool(b)) => SignalValue::Bool(!b),
                (SignalKind::AnalogInputRegister, SignalValue::Word(w)) => {
                    SignalValue::Word(w.wrapping_add(1))
                }
                (_, unchanged) => unchanged,
            };
        }
    }

    /// Call [`tick`](Self::tick) forever at `period`.
    pub async fn simulate(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.tick();
        }
    }
}

/// A small catalog used by `--simulate` when no signals are configured.
pub fn demo_signals() -> Vec<SignalDef> {
    vec![
        SignalDef::new("start_button", 0, SignalKind::DigitalInputContact)
            .with_display_name("Start button"),
        SignalDef::new("motor_on", 0, SignalKind::DigitalOutputCoil)
            .with_display_name("Motor contactor"),
        SignalDef::new("tank_level", 0, SignalKind::AnalogInputRegister)
            .with_display_name("Tank level")
            .with_value(40),
        SignalDef::new("temp_setpoint", 0, SignalKind::HoldingRegister)
            .with_display_name("Temperature setpoint")
            .with_value(72),
    ]
}

#[async_trait]
impl Connector for MockDevice {
    async fn connect(&self) -> Result<Box<dyn ModbusSession>, TransportError> {
        let mut state = self.lock();
        if state.offline {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(Box::new(MockSession {
            device: self.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

struct MockSession {
    device: MockDevice,
}

impl MockSession {
    async fn delay(&self) -> Result<(), TransportError> {
        let (latency, offline) = {
            let state = self.device.lock();
            (state.latency, state.offline)
        };
        if offline {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ModbusSession for MockSession {
    async fn read(
        &mut self,
        kind: SignalKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<SignalValue>, TransportError> {
        self.delay().await?;

        let mut state = self.device.lock();
        state.requests += 1;
        (0..count)
            .map(|offset| {
                let address = address.checked_add(offset).ok_or_else(|| {
                    TransportError::Exception("IllegalDataAddress".to_string())
                })?;
                state.read((kind, address))
            })
            .collect()
    }

    async fn write(
        &mut self,
        kind: SignalKind,
        address: u16,
        value: SignalValue,
    ) -> Result<(), TransportError> {
        self.delay().await?;

        if !kind.is_writable() {
            return Err(TransportError::Exception("IllegalFunction".to_string()));
        }

        let mut state = self.device.lock();
        if state.failing.contains(&(kind, address)) {
            return Err(TransportError::Exception("IllegalDataAddress".to_string()));
        }
        let value = value.for_kind(kind);
        state.values.insert((kind, address), value);
        state.scripts.remove(&(kind, address));
        state.writes.push((kind, address, value));
        Ok(())
    }

    async fn close(&mut self) {}
}
