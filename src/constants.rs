//! Protocol constants for SPI-mode SD/MMC access.
//!
//! Values follow "SD Specifications Part 1 Physical Layer Simplified
//! Specification" (section references below are to version 5.00).

/// Clocks applied with chip-select deasserted before the first command so
/// the card can finish its power-up routine (sd spec 6.4.1.1).
pub const POWER_SEQUENCE_CLOCK_COUNT: u32 = 74;

/// Start + transmission bits of every command byte (sd spec 7.3.1.1).
pub const CMD_PREFIX: u8 = 0b0100_0000;

/// GO_IDLE_STATE - software reset, forces the card into idle state
pub const CMD0: u8 = 0;
/// SEND_OP_COND - legacy MMC initialization
pub const CMD1: u8 = 1;
/// SEND_IF_COND - interface condition (host voltage + check pattern)
pub const CMD8: u8 = 8;
/// SEND_CSD - read the card-specific data register
pub const CMD9: u8 = 9;
/// SEND_CID - read the card identification register
pub const CMD10: u8 = 10;
/// STOP_TRANSMISSION - terminates a multiple block read
pub const CMD12: u8 = 12;
/// SET_BLOCKLEN - fixes the block length on SDSC cards
pub const CMD16: u8 = 16;
/// READ_SINGLE_BLOCK
pub const CMD17: u8 = 17;
/// READ_MULTIPLE_BLOCK - streams blocks until STOP_TRANSMISSION
pub const CMD18: u8 = 18;
/// WRITE_BLOCK
pub const CMD24: u8 = 24;
/// WRITE_MULTIPLE_BLOCK - accepts blocks until the stop-tran token
pub const CMD25: u8 = 25;
/// APP_CMD - marks the next command as application specific
pub const CMD55: u8 = 55;
/// READ_OCR - read the operation conditions register
pub const CMD58: u8 = 58;
/// CRC_ON_OFF - toggles CRC checking on the card
pub const CMD59: u8 = 59;
/// SD_SEND_OP_COND, sent as ACMD41 (CMD55 + CMD41)
pub const ACMD41: u8 = 41;

pub const CMD_ARG_NONE: u32 = 0x0000_0000;
/// CMD8 voltage-supplied field: 2.7-3.6 V
pub const CMD8_VHS_2_7_TO_3_6_V: u32 = 0b0000_0001;
/// CMD8 echo-back check pattern
pub const CMD8_CHECK_PATTERN: u32 = 0b1011_0101;
/// ACMD41 host-capacity-support bit
pub const ACMD41_ARG_HC: u32 = 0x4000_0000;
pub const CMD59_ARG_ENABLE: u32 = 0x0000_0001;
pub const CMD59_ARG_DISABLE: u32 = 0x0000_0000;

/// Sentinel returned when no valid R1 byte was seen; a real R1 byte always
/// has the most significant bit clear.
pub const INVALID_R1: u8 = 0b1000_0000;

/// Start-of-data token for CMD17/CMD18/CMD24 (sd spec 7.3.3)
pub const DATA_TOKEN_CMD_17_18_24: u8 = 0b1111_1110;
/// Start-of-data token for each CMD25 block
pub const DATA_TOKEN_CMD_25: u8 = 0b1111_1100;
/// Stop-tran token ending a CMD25 sequence
pub const DATA_TOKEN_CMD_25_STOP: u8 = 0b1111_1101;

/// OCR: card capacity status, set on SDHC/SDXC (sd spec 5.1)
pub const OCR_CCS: u32 = 1 << 30;
/// OCR: clear while the card's power-up routine is still running
pub const OCR_POWER_UP_STATUS: u32 = 1 << 31;

pub const CID_CSD_REG_SIZE: usize = 16;

/// The only supported block size; SDHC/SDXC are fixed to it by spec and
/// SDSC cards are forced to it with CMD16 during init.
pub const SD_BLOCK_SIZE: usize = 512;

/// Filler value exchanged while the card drives the bus.
pub const DUMMY_BYTE: u8 = 0xFF;

// Retry budgets below act as timeouts for specific waits. They are bounded
// iteration counts, not wall-clock timers; `SdSpiConfig` can override each
// of them per driver instance.
pub const R1_POLLING_RETRY_CNT: i32 = 10_000;
pub const DATA_TOKEN_RETRY_CNT: i32 = 10_000;
pub const INIT_CMD_RETRY_CNT: i32 = 1_000;
pub const INIT_CMD0_RETRY_CNT: i32 = 3;
pub const WAIT_FOR_NOT_BUSY_CNT: i32 = 10_000;
pub const BLOCK_READ_CMD_RETRIES: i32 = 10;
pub const BLOCK_WRITE_CMD_RETRIES: i32 = 10;

/// Conservative SPI clock used while the init procedure runs.
pub const SPI_CLOCK_PREINIT_HZ: u32 = 100_000;
/// Clock requested from the bus once negotiation has finished.
pub const SPI_CLOCK_POSTINIT_HZ: u32 = 10_000_000;
