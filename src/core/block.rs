//! Block transfer engine: single and multi-block reads and writes with
//! CRC16-protected data packets.

use log::{debug, trace, warn};

use crate::{
    bus::SpiBusOps,
    card::AddressMode,
    constants::*,
    crc::crc16,
    response::DataResponse,
};

use super::SdSpiDriver;

/// What went wrong during a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// No start-of-data token arrived within the polling budget.
    NoToken,
    /// The command was not acknowledged, or the card never released the
    /// busy signal.
    Timeout,
    /// SPI transport failure, or a response byte outside the protocol.
    RxTx,
    /// The card refused a written block for a non-CRC reason.
    WriteRejected,
    /// CRC16 mismatch on a data packet, in either direction.
    CrcMismatch,
    /// The request itself is unsupported (card not initialized, or a
    /// buffer that is not a whole number of blocks).
    NotSupported,
}

/// A failed transfer, with the number of blocks fully completed before the
/// failure. Completed read blocks hold valid data; completed write blocks
/// were accepted by the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferError {
    pub kind: TransferKind,
    pub blocks_done: usize,
}

impl TransferError {
    fn new(kind: TransferKind, blocks_done: usize) -> Self {
        TransferError { kind, blocks_done }
    }
}

impl<T: SpiBusOps> SdSpiDriver<T> {
    /// Reads `data.len() / 512` consecutive blocks starting at
    /// `block_addr` and returns the number of blocks read. The buffer
    /// length must be a non-zero multiple of 512.
    pub fn read_blocks(
        &mut self,
        block_addr: u32,
        data: &mut [u8],
    ) -> Result<usize, TransferError> {
        let count = self.check_transfer(data.len())?;
        let cmd = if count == 1 { CMD17 } else { CMD18 };
        trace!("read {} blocks at {}", count, block_addr);

        let arg = self.block_argument(block_addr);
        let r1 = self.send_cmd_keep_selected(cmd, arg, self.config.block_read_cmd_retries);
        if !Self::r1_ok(r1) {
            self.end_transaction();
            warn!("CMD{} rejected (r1 {:#04x})", cmd, r1);
            return Err(TransferError::new(TransferKind::Timeout, 0));
        }

        let mut done = 0;
        for chunk in data.chunks_exact_mut(SD_BLOCK_SIZE) {
            if let Err(kind) = self.read_data_packet(chunk) {
                if cmd == CMD18 {
                    self.stop_transmission();
                } else {
                    self.end_transaction();
                }
                return Err(TransferError::new(kind, done));
            }
            done += 1;
        }

        if cmd == CMD18 {
            self.stop_transmission();
        } else {
            self.end_transaction();
        }
        Ok(done)
    }

    /// Writes `data.len() / 512` consecutive blocks starting at
    /// `block_addr` and returns the number of blocks the card accepted.
    pub fn write_blocks(&mut self, block_addr: u32, data: &[u8]) -> Result<usize, TransferError> {
        let count = self.check_transfer(data.len())?;
        let (cmd, token) = if count == 1 {
            (CMD24, DATA_TOKEN_CMD_17_18_24)
        } else {
            (CMD25, DATA_TOKEN_CMD_25)
        };
        trace!("write {} blocks at {}", count, block_addr);

        let arg = self.block_argument(block_addr);
        let r1 = self.send_cmd_keep_selected(cmd, arg, self.config.block_write_cmd_retries);
        if !Self::r1_ok(r1) {
            self.end_transaction();
            warn!("CMD{} rejected (r1 {:#04x})", cmd, r1);
            return Err(TransferError::new(TransferKind::Timeout, 0));
        }

        let mut done = 0;
        for chunk in data.chunks_exact(SD_BLOCK_SIZE) {
            if let Err(kind) = self.write_data_packet(token, chunk) {
                self.end_transaction();
                return Err(TransferError::new(kind, done));
            }
            done += 1;
        }

        if cmd == CMD25 {
            // Stop-tran token, one pad byte, then the card signals busy
            // while it commits.
            let sent = self
                .bus
                .transfer_byte(DATA_TOKEN_CMD_25_STOP)
                .and_then(|_| self.bus.transfer_byte(DUMMY_BYTE));
            if sent.is_err() {
                self.end_transaction();
                return Err(TransferError::new(TransferKind::RxTx, done));
            }
            if !self.wait_for_not_busy() {
                self.end_transaction();
                return Err(TransferError::new(TransferKind::Timeout, done));
            }
        }
        self.end_transaction();
        Ok(done)
    }

    fn check_transfer(&self, len: usize) -> Result<usize, TransferError> {
        if !self.card().is_initialized() {
            return Err(TransferError::new(TransferKind::NotSupported, 0));
        }
        if len == 0 || len % SD_BLOCK_SIZE != 0 {
            return Err(TransferError::new(TransferKind::NotSupported, 0));
        }
        Ok(len / SD_BLOCK_SIZE)
    }

    /// Translates a block index into a command argument: high-capacity
    /// cards address by block, standard-capacity cards by byte offset.
    fn block_argument(&self, block_addr: u32) -> u32 {
        match self.card().address_mode() {
            AddressMode::Block => block_addr,
            AddressMode::Byte => block_addr * SD_BLOCK_SIZE as u32,
        }
    }

    /// One inbound data packet: start token, payload, CRC16 trailer. The
    /// trailer is always clocked out but only verified in CRC mode.
    pub(crate) fn read_data_packet(&mut self, buf: &mut [u8]) -> Result<(), TransferKind> {
        self.wait_for_token(DATA_TOKEN_CMD_17_18_24)?;
        self.bus.recv(buf).map_err(|_| TransferKind::RxTx)?;
        let mut trailer = [0u8; 2];
        self.bus.recv(&mut trailer).map_err(|_| TransferKind::RxTx)?;
        if self.card().crc_enabled() {
            let received = u16::from_be_bytes(trailer);
            let computed = crc16(buf);
            if received != computed {
                debug!(
                    "data packet CRC mismatch: received {:#06x}, computed {:#06x}",
                    received, computed
                );
                return Err(TransferKind::CrcMismatch);
            }
        }
        Ok(())
    }

    /// One outbound data packet: start token, payload, CRC16, then the
    /// card's data-response token and busy period.
    fn write_data_packet(&mut self, token: u8, data: &[u8]) -> Result<(), TransferKind> {
        self.bus.transfer_byte(token).map_err(|_| TransferKind::RxTx)?;
        self.bus.send(data).map_err(|_| TransferKind::RxTx)?;
        let crc = crc16(data);
        self.bus
            .send(&crc.to_be_bytes())
            .map_err(|_| TransferKind::RxTx)?;

        let resp = self
            .bus
            .transfer_byte(DUMMY_BYTE)
            .map_err(|_| TransferKind::RxTx)?;
        match DataResponse::parse(resp) {
            DataResponse::Accepted => {}
            DataResponse::CrcRejected => return Err(TransferKind::CrcMismatch),
            DataResponse::WriteRejected => return Err(TransferKind::WriteRejected),
            DataResponse::Unrecognized | DataResponse::Invalid => {
                debug!("unrecognized data response {:#04x}", resp);
                return Err(TransferKind::RxTx);
            }
        }
        if !self.wait_for_not_busy() {
            return Err(TransferKind::Timeout);
        }
        Ok(())
    }

    /// Polls for a start-of-data token, skipping idle line levels.
    fn wait_for_token(&mut self, token: u8) -> Result<(), TransferKind> {
        let mut tries = self.config.data_token_retries;
        loop {
            match self.bus.transfer_byte(DUMMY_BYTE) {
                Ok(byte) if byte == token => return Ok(()),
                Ok(_) => {}
                Err(_) => return Err(TransferKind::RxTx),
            }
            if tries == 0 {
                return Err(TransferKind::NoToken);
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// CMD12 ends a multi-block read; the card may answer with a stuff
    /// byte before R1 and hold the line busy afterwards.
    fn stop_transmission(&mut self) {
        let r1 = self.send_cmd_keep_selected(CMD12, CMD_ARG_NONE, 0);
        if !Self::r1_ok(r1) {
            debug!("CMD12 not acknowledged (r1 {:#04x})", r1);
        }
        let _ = self.wait_for_not_busy();
        self.end_transaction();
    }
}
