//! PL20 serial framing.
//!
//! Every exchange is one 4-byte request and a 2-byte reply:
//!
//! ```text
//! request: [command][address][0x00][255 - command]
//! reply:   [200][value]
//! ```
//!
//! The line runs at 8N1 with no flow control. A failed exchange closes the
//! port; the next one reopens it. A successful exchange keeps it open.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::Memory;

/// Acknowledge byte leading every reply.
pub const ACK: u8 = 200;

/// How long to wait for each chunk of a reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// PL20 command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ReadRam = 20,
    ReadEeprom = 72,
    WriteRam = 152,
    WriteEeprom = 202,
    Push = 87,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn checksum(self) -> u8 {
        255 - self.code()
    }

    /// The read command for a memory bank.
    pub fn read(memory: Memory) -> Self {
        match memory {
            Memory::Ram => Command::ReadRam,
            Memory::Eeprom => Command::ReadEeprom,
        }
    }
}

pub fn encode_request(command: Command, address: u8) -> [u8; 4] {
    [command.code(), address, 0x00, command.checksum()]
}

#[derive(Debug, Error)]
pub enum Pl20Error {
    #[error("Failed to open serial port: {0}")]
    Open(#[source] io::Error),

    #[error("Failed to send request: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to read reply: {0}")]
    Read(#[source] io::Error),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Port closed before the reply was complete")]
    Eof,

    #[error("Expected ack 200, got {0}")]
    BadAck(u8),
}

/// Opens the serial line on demand.
pub trait PortOpener {
    type Port: AsyncRead + AsyncWrite + Unpin;

    fn open(&mut self) -> io::Result<Self::Port>;
}

/// Opens a real serial device at 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    device: String,
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
        }
    }
}

impl PortOpener for SerialOpener {
    type Port = tokio_serial::SerialStream;

    fn open(&mut self) -> io::Result<Self::Port> {
        let builder = tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(REPLY_TIMEOUT);
        let port = tokio_serial::SerialStream::open(&builder)?;
        debug!(device = %self.device, baud_rate = self.baud_rate, "Opened PL20 port");
        Ok(port)
    }
}

/// One PL20 controller on a serial line.
pub struct Pl20<O: PortOpener> {
    opener: O,
    port: Option<O::Port>,
    reply_timeout: Duration,
}

impl<O: PortOpener> Pl20<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            port: None,
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Open the port now instead of on the first exchange.
    pub fn open(&mut self) -> Result<(), Pl20Error> {
        if self.port.is_none() {
            self.port = Some(self.opener.open().map_err(Pl20Error::Open)?);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.port = None;
    }

    /// Read one byte from RAM or EEPROM.
    pub async fn read(&mut self, memory: Memory, address: u8) -> Result<u8, Pl20Error> {
        let result = self.exchange(Command::read(memory), address).await;
        if result.is_err() {
            self.close();
        }
        result
    }

    async fn exchange(&mut self, command: Command, address: u8) -> Result<u8, Pl20Error> {
        self.open()?;
        let port = self.port.as_mut().ok_or(Pl20Error::Eof)?;

        let request = encode_request(command, address);
        trace!(?request, "PL20 request");
        port.write_all(&request).await.map_err(Pl20Error::Write)?;
        port.flush().await.map_err(Pl20Error::Write)?;

        let mut reply = [0u8; 2];
        let mut received = 0;
        while received < reply.len() {
            let n = tokio::time::timeout(self.reply_timeout, port.read(&mut reply[received..]))
                .await
                .map_err(|_| Pl20Error::Timeout(self.reply_timeout))?
                .map_err(Pl20Error::Read)?;
            if n == 0 {
                return Err(Pl20Error::Eof);
            }
            if received == 0 && reply[0] != ACK {
                return Err(Pl20Error::BadAck(reply[0]));
            }
            received += n;
        }

        trace!(?reply, "PL20 reply");
        Ok(reply[1])
    }
}
