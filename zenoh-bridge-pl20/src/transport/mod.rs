//! Register-level access to slaves, independent of the wire protocol.

mod modbus;
mod pl20;

pub use modbus::ModbusRtuTransport;
pub use pl20::Pl20Transport;

use thiserror::Error;

use crate::pl20::Pl20Error;

/// A failed bus transaction. Always recoverable: the caller records a noread
/// on the affected tags and a failure on the slave.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bus I/O error: {0}")]
    Io(String),

    #[error("No response within timeout")]
    Timeout,

    #[error("Slave exception: {0}")]
    Exception(String),

    #[error(transparent)]
    Framing(#[from] Pl20Error),

    #[error("Register address {0} not reachable on this bus")]
    AddressOutOfRange(u16),

    #[error("{0} is not supported on this bus")]
    Unsupported(&'static str),

    #[error("Transport is closed")]
    Closed,
}

/// Holding-register access used by the polling engine.
#[allow(async_fn_in_trait)]
pub trait RegisterTransport {
    /// Read `count` consecutive holding registers starting at `start`.
    async fn read_holding_registers(
        &mut self,
        slave: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write one holding register.
    async fn write_register(
        &mut self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    /// Release the underlying port.
    async fn close(&mut self);
}
