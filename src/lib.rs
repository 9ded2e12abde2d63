//! SPI-mode SD/MMC block device driver.
//!
//! The driver speaks the SD card SPI protocol over a platform-supplied
//! [`SpiBusOps`] implementation: it powers the card up, negotiates the
//! card generation (SD v2, SD v1 or MMC), decodes the identity registers
//! and then moves 512-byte blocks with CRC16 protection.
//!
//! ```no_run
//! # use sdcard_spi::{SdSpiDriver, SpiBusOps, SpiBusResult};
//! # struct Spi;
//! # impl SpiBusOps for Spi {
//! #     fn transfer_byte(&mut self, _: u8) -> SpiBusResult<u8> { Ok(0xFF) }
//! #     fn select(&mut self) -> SpiBusResult { Ok(()) }
//! #     fn deselect(&mut self) -> SpiBusResult { Ok(()) }
//! #     fn set_clock(&mut self, _: u32) -> SpiBusResult { Ok(()) }
//! # }
//! let mut driver = SdSpiDriver::new(Spi);
//! driver.init().unwrap();
//! let mut block = [0u8; 512];
//! driver.read_blocks(0, &mut block).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod card;
pub mod config;
pub mod constants;
mod core;
pub mod crc;
pub mod response;

pub use bus::{SpiBusError, SpiBusOps, SpiBusResult};
pub use card::{AddressMode, CardType, SdCard};
pub use config::{OcrVoltage, SdSpiConfig};
pub use self::core::block::{TransferError, TransferKind};
pub use self::core::{InitError, SdSpiDriver};
