//! Modbus/TCP sessions backed by tokio-modbus.

use async_trait::async_trait;
use tokio_modbus::ExceptionCode;
use tokio_modbus::client::{Client, Context};
use tokio_modbus::prelude::*;

use plclink_common::{SignalKind, SignalValue};

use super::{Connector, ModbusSession};
use crate::error::TransportError;

/// Connects to a PLC over Modbus/TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn ModbusSession>, TransportError> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::Connection(format!("Invalid address: {}", e)))?
            .next()
            .ok_or_else(|| {
                TransportError::Connection(format!("No address found for {}", self.host))
            })?;

        let ctx = tcp::connect_slave(addr, Slave(self.unit_id))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Box::new(TcpSession { ctx }))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct TcpSession {
    ctx: Context,
}

fn io_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Io(e.to_string())
}

fn exception(code: ExceptionCode) -> TransportError {
    TransportError::Exception(format!("{:?}", code))
}

fn bits(values: Vec<bool>, count: u16) -> Vec<SignalValue> {
    values
        .into_iter()
        .take(usize::from(count))
        .map(SignalValue::Bool)
        .collect()
}

fn words(values: Vec<u16>) -> Vec<SignalValue> {
    values.into_iter().map(SignalValue::Word).collect()
}

#[async_trait]
impl ModbusSession for TcpSession {
    async fn read(
        &mut self,
        kind: SignalKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<SignalValue>, TransportError> {
        match kind {
            SignalKind::DigitalInputContact => self
                .ctx
                .read_discrete_inputs(address, count)
                .await
                .map_err(io_error)?
                .map(|v| bits(v, count))
                .map_err(exception),
            SignalKind::DigitalOutputCoil => self
                .ctx
                .read_coils(address, count)
                .await
                .map_err(io_error)?
                .map(|v| bits(v, count))
                .map_err(exception),
            SignalKind::AnalogInputRegister => self
                .ctx
                .read_input_registers(address, count)
                .await
                .map_err(io_error)?
                .map(words)
                .map_err(exception),
            SignalKind::HoldingRegister => self
                .ctx
                .read_holding_registers(address, count)
                .await
                .map_err(io_error)?
                .map(words)
                .map_err(exception),
        }
    }

    async fn write(
        &mut self,
        kind: SignalKind,
        address: u16,
        value: SignalValue,
    ) -> Result<(), TransportError> {
        match kind {
            SignalKind::DigitalOutputCoil => self
                .ctx
                .write_single_coil(address, value.as_bool())
                .await
                .map_err(io_error)?
                .map_err(exception),
            SignalKind::HoldingRegister => self
                .ctx
                .write_single_register(address, value.as_word())
                .await
                .map_err(io_error)?
                .map_err(exception),
            other => Err(TransportError::UnsupportedOperation(format!(
                "{} is read-only",
                other.label()
            ))),
        }
    }

    async fn close(&mut self) {
        let _ = self.ctx.disconnect().await;
    }
}
