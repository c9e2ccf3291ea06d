//! Modbus RTU master over a serial line.

use std::time::Duration;

use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, trace};

use super::{RegisterTransport, TransportError};
use crate::error::GatewayError;

/// Modbus RTU client; one context shared by every slave on the line.
pub struct ModbusRtuTransport {
    ctx: Option<Context>,
    device: String,
    response_timeout: Duration,
    debug_level: u8,
}

impl std::fmt::Debug for ModbusRtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuTransport")
            .field("device", &self.device)
            .field("open", &self.ctx.is_some())
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl ModbusRtuTransport {
    /// Open the serial port at `baud_rate`, 8N1.
    pub fn open(
        device: &str,
        baud_rate: u32,
        response_timeout: Duration,
        debug_level: u8,
    ) -> Result<Self, GatewayError> {
        let builder = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One);

        let serial =
            tokio_serial::SerialStream::open(&builder).map_err(|e| GatewayError::TransportOpen {
                device: device.to_string(),
                message: e.to_string(),
            })?;

        debug!(device, baud_rate, ?response_timeout, "Opened Modbus RTU port");

        Ok(Self {
            ctx: Some(rtu::attach_slave(serial, Slave(1))),
            device: device.to_string(),
            response_timeout,
            debug_level,
        })
    }

    fn context(&mut self, slave: u8) -> Result<&mut Context, TransportError> {
        let ctx = self.ctx.as_mut().ok_or(TransportError::Closed)?;
        ctx.set_slave(Slave(slave));
        Ok(ctx)
    }
}

impl RegisterTransport for ModbusRtuTransport {
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let timeout = self.response_timeout;
        let debug_level = self.debug_level;
        let ctx = self.context(slave)?;

        if debug_level > 0 {
            debug!(slave, start, count, "Read holding registers");
        }

        let registers = tokio::time::timeout(timeout, ctx.read_holding_registers(start, count))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Io(e.to_string()))?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))?;

        if debug_level > 1 {
            trace!(slave, start, ?registers, "Registers");
        }
        Ok(registers)
    }

    async fn write_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let timeout = self.response_timeout;
        let debug_level = self.debug_level;
        let ctx = self.context(slave)?;

        if debug_level > 0 {
            debug!(slave, address, value, "Write single register");
        }

        tokio::time::timeout(timeout, ctx.write_single_register(address, value))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Io(e.to_string()))?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }

    async fn close(&mut self) {
        if self.ctx.take().is_some() {
            debug!(device = %self.device, "Closed Modbus RTU port");
        }
    }
}
