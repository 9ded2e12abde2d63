//! Seam between the protocol driver and the platform's SPI master and
//! chip-select line. Implementations are expected to block until the byte
//! exchange completes; the driver never retains the bus across calls.

use crate::constants::DUMMY_BYTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiBusError {
    /// The byte exchange failed at the transport level.
    RxTx,
}

pub type SpiBusResult<T = ()> = Result<T, SpiBusError>;

pub trait SpiBusOps {
    /// Clocks one byte out while sampling one byte in.
    fn transfer_byte(&mut self, out: u8) -> SpiBusResult<u8>;

    /// Asserts chip-select. Must be idempotent.
    fn select(&mut self) -> SpiBusResult;

    /// Releases chip-select. Must be idempotent.
    fn deselect(&mut self) -> SpiBusResult;

    /// Requests a new SPI clock rate. The bus may round to the nearest rate
    /// it can produce; it must not exceed `hz`.
    fn set_clock(&mut self, hz: u32) -> SpiBusResult;

    fn send(&mut self, data: &[u8]) -> SpiBusResult {
        for &byte in data {
            self.transfer_byte(byte)?;
        }
        Ok(())
    }

    fn recv(&mut self, data: &mut [u8]) -> SpiBusResult {
        for slot in data.iter_mut() {
            *slot = self.transfer_byte(DUMMY_BYTE)?;
        }
        Ok(())
    }
}
