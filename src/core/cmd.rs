//! Command dispatcher: frames commands, polls for the R1 status byte and
//! manages chip-select around each transaction.
//!
//! Retry arguments follow one convention everywhere: 0 means a single
//! attempt, a positive value allows that many additional attempts, and a
//! negative value retries without bound.

use log::trace;

use crate::{bus::SpiBusOps, constants::*, crc::crc7, response::R1Response};

use super::SdSpiDriver;

impl<T: SpiBusOps> SdSpiDriver<T> {
    /// Sends one command and returns its R1 status byte, releasing
    /// chip-select afterwards. `INVALID_R1` is returned when no valid
    /// response was seen within the retry budget.
    pub fn send_cmd(&mut self, cmd: u8, arg: u32, max_retry: i32) -> u8 {
        let r1 = self.send_cmd_keep_selected(cmd, arg, max_retry);
        self.end_transaction();
        r1
    }

    /// Like `send_cmd` but leaves chip-select asserted on success so the
    /// caller can read a response trailer or a data packet. The caller
    /// must finish with `end_transaction`.
    pub(crate) fn send_cmd_keep_selected(&mut self, cmd: u8, arg: u32, max_retry: i32) -> u8 {
        let mut tries = max_retry;
        loop {
            let r1 = self.try_send_cmd(cmd, arg);
            if R1Response::is_valid_byte(r1) {
                trace!("CMD{} arg {:#010x} -> r1 {:#04x}", cmd, arg, r1);
                return r1;
            }
            self.end_transaction();
            if tries == 0 {
                trace!("CMD{} arg {:#010x} -> no response", cmd, arg);
                return INVALID_R1;
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// One framed command attempt: select, wait out any pending busy
    /// signalling, clock the 6-byte frame and poll for R1.
    fn try_send_cmd(&mut self, cmd: u8, arg: u32) -> u8 {
        if self.bus.select().is_err() {
            return INVALID_R1;
        }
        if !self.wait_for_not_busy() {
            return INVALID_R1;
        }
        let mut frame = [0u8; 6];
        frame[0] = CMD_PREFIX | cmd;
        frame[1..5].copy_from_slice(&arg.to_be_bytes());
        frame[5] = crc7(&frame[..5]);
        if self.bus.send(&frame).is_err() {
            return INVALID_R1;
        }
        self.poll_r1()
    }

    /// Application-specific command: CMD55 followed by the command itself.
    /// A CMD55 rejection short-circuits the pair and its status byte
    /// becomes the result, so an illegal-command reply stays visible to
    /// the caller.
    pub fn send_acmd(&mut self, cmd: u8, arg: u32, max_retry: i32) -> u8 {
        let mut tries = max_retry;
        loop {
            let mut r1 = self.send_cmd(CMD55, CMD_ARG_NONE, 0);
            if Self::r1_ok(r1) {
                r1 = self.send_cmd(cmd, arg, 0);
            }
            if Self::r1_ok(r1) {
                return r1;
            }
            if tries == 0 {
                return r1;
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// Skips idle line levels until a byte with a clear MSB arrives.
    fn poll_r1(&mut self) -> u8 {
        let mut tries = self.config.r1_polling_retries;
        loop {
            match self.bus.transfer_byte(DUMMY_BYTE) {
                Ok(byte) if R1Response::is_valid_byte(byte) => return byte,
                Ok(_) => {}
                Err(_) => return INVALID_R1,
            }
            if tries == 0 {
                return INVALID_R1;
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// Polls until the card stops holding the data line low. Busy is
    /// signalled as 0x00; any other byte means the line was released.
    /// Returns false when the budget runs out or the bus fails.
    pub(crate) fn wait_for_not_busy(&mut self) -> bool {
        let mut tries = self.config.not_busy_retries;
        loop {
            match self.bus.transfer_byte(DUMMY_BYTE) {
                Ok(0x00) => {}
                Ok(_) => return true,
                Err(_) => return false,
            }
            if tries == 0 {
                return false;
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// Releases chip-select and applies eight extra clocks so the card
    /// lets go of its output line.
    pub(crate) fn end_transaction(&mut self) {
        let _ = self.bus.deselect();
        let _ = self.bus.transfer_byte(DUMMY_BYTE);
    }
}
