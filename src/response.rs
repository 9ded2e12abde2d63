//! Decoding of the card's single-byte responses: the R1 status byte
//! returned after every command and the data-response token returned after
//! every written block.

use bitflags::bitflags;

bitflags! {
    /// R1 status byte (sd spec 7.3.2.1). Bit 7 is always zero in a valid
    /// byte; idle-state and erase-reset are informational, the remaining
    /// five bits report errors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1Response: u8 {
        const IN_IDLE_STATE       = 0b0000_0001;
        const ERASE_RESET         = 0b0000_0010;
        const ILLEGAL_COMMAND     = 0b0000_0100;
        const COM_CRC_ERROR       = 0b0000_1000;
        const ERASE_SEQUENCE_ERROR = 0b0001_0000;
        const ADDRESS_ERROR       = 0b0010_0000;
        const PARAMETER_ERROR     = 0b0100_0000;
    }
}

impl R1Response {
    /// A byte is a valid R1 response iff its MSB is clear; an idle bus
    /// reads as 0xFF.
    pub fn is_valid_byte(raw: u8) -> bool {
        raw >> 7 == 0
    }

    pub fn idle(self) -> bool {
        self.contains(R1Response::IN_IDLE_STATE)
    }

    pub fn illegal_command(self) -> bool {
        self.contains(R1Response::ILLEGAL_COMMAND)
    }

    /// True iff any of the five error bits is set, regardless of the
    /// idle-state and erase-reset bits.
    pub fn has_error(self) -> bool {
        self.intersects(
            R1Response::ILLEGAL_COMMAND
                | R1Response::COM_CRC_ERROR
                | R1Response::ERASE_SEQUENCE_ERROR
                | R1Response::ADDRESS_ERROR
                | R1Response::PARAMETER_ERROR,
        )
    }
}

/// Data-response token returned after each written block (sd spec
/// 7.3.3.1). The low nibble carries the status; a token whose fixed bits
/// do not match the `x.xxx.0.1` pattern is not a response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataResponse {
    Accepted,
    CrcRejected,
    WriteRejected,
    /// Valid framing bits but a status pattern the spec does not define.
    Unrecognized,
    /// Not a data-response token (e.g. 0xFF from an unresponsive card).
    Invalid,
}

impl DataResponse {
    pub fn parse(token: u8) -> Self {
        if token & 0b0001_0001 != 0b0000_0001 {
            return DataResponse::Invalid;
        }
        match token & 0b0000_1110 {
            0b0000_0100 => DataResponse::Accepted,
            0b0000_1010 => DataResponse::CrcRejected,
            0b0000_1100 => DataResponse::WriteRejected,
            _ => DataResponse::Unrecognized,
        }
    }
}
