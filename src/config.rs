//! Per-driver configuration: the host's supported voltage window, the two
//! SPI clock rates, and every retry budget used as a bounded wait.

use bitflags::bitflags;

use crate::constants::*;

bitflags! {
    /// Voltage window bits of the OCR register (sd spec 5.1). The set a
    /// host configures here must match its actual supply wiring; init
    /// fails when the card's OCR does not cover all of it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OcrVoltage: u32 {
        const V2_7_TO_2_8 = 1 << 15;
        const V2_8_TO_2_9 = 1 << 16;
        const V2_9_TO_3_0 = 1 << 17;
        const V3_0_TO_3_1 = 1 << 18;
        const V3_1_TO_3_2 = 1 << 19;
        const V3_2_TO_3_3 = 1 << 20;
        const V3_3_TO_3_4 = 1 << 21;
        const V3_4_TO_3_5 = 1 << 22;
        const V3_5_TO_3_6 = 1 << 23;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdSpiConfig {
    /// Voltage range the board supplies to the card slot.
    pub voltage_window: OcrVoltage,
    /// SPI clock used while the init procedure is performed.
    pub clock_preinit_hz: u32,
    /// SPI clock requested once init has finished.
    pub clock_postinit_hz: u32,
    /// Bytes polled for the first valid R1 byte after a command frame.
    pub r1_polling_retries: i32,
    /// Bytes polled for a start-of-data token.
    pub data_token_retries: i32,
    /// Poll count for init-sequence commands (ACMD41/CMD1 negotiation).
    pub init_cmd_retries: i32,
    /// Resets attempted before concluding no card is present.
    pub cmd0_retries: i32,
    /// Bytes polled while the card holds the data line low. Negative
    /// blocks until the card releases the bus.
    pub not_busy_retries: i32,
    /// Retries for the command frame of a block read (not the transfer).
    pub block_read_cmd_retries: i32,
    /// Retries for the command frame of a block write (not the transfer).
    pub block_write_cmd_retries: i32,
}

impl Default for SdSpiConfig {
    fn default() -> Self {
        SdSpiConfig {
            voltage_window: OcrVoltage::V3_2_TO_3_3.union(OcrVoltage::V3_3_TO_3_4),
            clock_preinit_hz: SPI_CLOCK_PREINIT_HZ,
            clock_postinit_hz: SPI_CLOCK_POSTINIT_HZ,
            r1_polling_retries: R1_POLLING_RETRY_CNT,
            data_token_retries: DATA_TOKEN_RETRY_CNT,
            init_cmd_retries: INIT_CMD_RETRY_CNT,
            cmd0_retries: INIT_CMD0_RETRY_CNT,
            not_busy_retries: WAIT_FOR_NOT_BUSY_CNT,
            block_read_cmd_retries: BLOCK_READ_CMD_RETRIES,
            block_write_cmd_retries: BLOCK_WRITE_CMD_RETRIES,
        }
    }
}
