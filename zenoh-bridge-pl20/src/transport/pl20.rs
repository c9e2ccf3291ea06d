//! Register view of a PL20 controller: each register is one byte of RAM or
//! EEPROM, fetched by its own request.

use super::{RegisterTransport, TransportError};
use crate::config::Memory;
use crate::pl20::{Pl20, PortOpener};

pub struct Pl20Transport<O: PortOpener> {
    pl20: Pl20<O>,
    memory: Memory,
}

impl<O: PortOpener> Pl20Transport<O> {
    pub fn new(pl20: Pl20<O>, memory: Memory) -> Self {
        Self { pl20, memory }
    }
}

impl<O: PortOpener> RegisterTransport for Pl20Transport<O> {
    /// The slave id is ignored: a PL20 line carries a single controller.
    async fn read_holding_registers(
        &mut self,
        _slave: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut values = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let register = start
                .checked_add(offset)
                .ok_or(TransportError::AddressOutOfRange(start))?;
            let address =
                u8::try_from(register).map_err(|_| TransportError::AddressOutOfRange(register))?;
            let value = self.pl20.read(self.memory, address).await?;
            values.push(u16::from(value));
        }
        Ok(values)
    }

    async fn write_register(
        &mut self,
        _slave: u8,
        _address: u16,
        _value: u16,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("PL20 register writes"))
    }

    async fn close(&mut self) {
        self.pl20.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pl20::tests::MockOpener;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_each_register() {
        let port = Builder::new()
            .write(&[20, 10, 0, 235])
            .read(&[200, 1])
            .write(&[20, 11, 0, 235])
            .read(&[200, 2])
            .build();
        let mut transport = Pl20Transport::new(Pl20::new(MockOpener::new(vec![port])), Memory::Ram);

        let values = transport.read_holding_registers(1, 10, 2).await.unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_eeprom_bank() {
        let port = Builder::new()
            .write(&[72, 0, 0, 183])
            .read(&[200, 77])
            .build();
        let mut transport =
            Pl20Transport::new(Pl20::new(MockOpener::new(vec![port])), Memory::Eeprom);

        assert_eq!(transport.read_holding_registers(1, 0, 1).await.unwrap(), vec![77]);
    }

    #[tokio::test]
    async fn test_bad_ack_is_framing_error() {
        let port = Builder::new()
            .write(&[20, 10, 0, 235])
            .read(&[0, 1])
            .build();
        let mut transport = Pl20Transport::new(Pl20::new(MockOpener::new(vec![port])), Memory::Ram);

        let err = transport.read_holding_registers(1, 10, 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
    }

    #[tokio::test]
    async fn test_address_beyond_byte_range() {
        let mut transport = Pl20Transport::new(Pl20::new(MockOpener::new(Vec::new())), Memory::Ram);
        let err = transport.read_holding_registers(1, 256, 1).await.unwrap_err();
        assert!(matches!(err, TransportError::AddressOutOfRange(256)));
    }

    #[tokio::test]
    async fn test_writes_unsupported() {
        let mut transport = Pl20Transport::new(Pl20::new(MockOpener::new(Vec::new())), Memory::Ram);
        let err = transport.write_register(1, 3, 4).await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }
}
