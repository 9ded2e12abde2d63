//! Driver core: owns the bus collaborator and the card context, and runs
//! the power-up / negotiation state machine that fills the context in.

pub mod block;
mod cmd;

use log::{debug, info, warn};

use crate::{
    bus::SpiBusOps,
    card::{AddressMode, CardType, SdCard},
    card::cid::SdCid,
    card::csd::{CsdVersion, SdCsd},
    config::SdSpiConfig,
    constants::*,
    response::R1Response,
};

/// Fatal initialization failures. The context stays uninitialized on every
/// one of them; calling `init` again restarts from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// CMD0 never produced the idle-state bit; no card or unresponsive.
    NoCard,
    /// CMD8 returned a malformed response, neither v2 echo nor legacy
    /// rejection.
    UnknownCard,
    /// The card's OCR does not cover the configured voltage window.
    VoltageMismatch,
    /// ACMD41/CMD1 polling exhausted its budget with the card still idle.
    NegotiationTimeout,
    /// OCR power-up-status bit still clear after negotiation.
    PowerUp,
    /// CMD16 rejected on a byte-addressed card.
    BlockLength,
    /// CMD59 rejected; the card refuses CRC-checked mode.
    CrcEnable,
    /// CID/CSD read failed (no data token or corrupt payload).
    RegisterRead,
    /// The CSD structure version is one this driver cannot interpret.
    UnsupportedCsd,
    /// SPI transport failure.
    Bus,
}

/// States of the init sequence, one dispatcher interaction per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Start,
    PowerSequence,
    SendCmd0,
    SendCmd8,
    CardUnknown,
    SendAcmd41Hcs,
    SendAcmd41,
    SendCmd1,
    SendCmd58,
    SendCmd16,
    EnableCrc,
    ReadCid,
    ReadCsd,
    SetMaxClock,
    Finish,
}

/// SPI-mode SD/MMC driver bound to one card slot. Synchronous and
/// single-threaded: callers serialize access to a given driver value.
pub struct SdSpiDriver<T: SpiBusOps> {
    bus: T,
    config: SdSpiConfig,
    card: SdCard,
}

impl<T: SpiBusOps> SdSpiDriver<T> {
    pub fn new(bus: T) -> Self {
        Self::with_config(bus, SdSpiConfig::default())
    }

    pub fn with_config(bus: T, config: SdSpiConfig) -> Self {
        SdSpiDriver {
            bus,
            config,
            card: SdCard::new(),
        }
    }

    pub fn card(&self) -> &SdCard {
        &self.card
    }

    pub fn bus(&self) -> &T {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    /// Releases the bus collaborator.
    pub fn free(self) -> T {
        self.bus
    }

    /// Card capacity in bytes (0 before init or on unsupported CSD).
    pub fn capacity(&self) -> u64 {
        self.card.capacity()
    }

    /// Number of 512-byte sectors.
    pub fn sector_count(&self) -> u32 {
        self.card.sector_count()
    }

    /// Runs the full power-up and negotiation sequence and fills the card
    /// context. Not re-entrant; on failure the context is left
    /// uninitialized and a later call starts over.
    pub fn init(&mut self) -> Result<(), InitError> {
        self.card.reset();

        let mut state = InitState::Start;
        loop {
            state = match state {
                InitState::Start => {
                    info!("sd card initialization started");
                    InitState::PowerSequence
                }
                InitState::PowerSequence => {
                    self.power_sequence()?;
                    InitState::SendCmd0
                }
                InitState::SendCmd0 => {
                    let r1 = self.send_cmd(CMD0, CMD_ARG_NONE, self.config.cmd0_retries);
                    if !R1Response::is_valid_byte(r1)
                        || !R1Response::from_bits_retain(r1).idle()
                    {
                        warn!("CMD0 failed, no card present (r1 {:#04x})", r1);
                        return Err(InitError::NoCard);
                    }
                    InitState::SendCmd8
                }
                InitState::SendCmd8 => self.check_interface_condition()?,
                InitState::CardUnknown => {
                    warn!("CMD8 response malformed, unknown card");
                    return Err(InitError::UnknownCard);
                }
                InitState::SendAcmd41Hcs => {
                    self.negotiate_acmd41(ACMD41_ARG_HC)?;
                    self.card.set_card_type(CardType::SdV2);
                    InitState::SendCmd58
                }
                InitState::SendAcmd41 => {
                    match self.negotiate_acmd41(CMD_ARG_NONE) {
                        Ok(()) => {
                            self.card.set_card_type(CardType::SdV1);
                            InitState::SendCmd58
                        }
                        // ACMD41 unsupported at all: not an SD card, try
                        // the MMC init command.
                        Err(InitError::UnknownCard) => InitState::SendCmd1,
                        Err(err) => return Err(err),
                    }
                }
                InitState::SendCmd1 => {
                    self.negotiate_cmd1()?;
                    self.card.set_card_type(CardType::MmcV3);
                    InitState::SendCmd58
                }
                InitState::SendCmd58 => {
                    self.read_operation_conditions()?;
                    InitState::SendCmd16
                }
                InitState::SendCmd16 => {
                    self.set_block_length()?;
                    InitState::EnableCrc
                }
                InitState::EnableCrc => {
                    let r1 = self.send_cmd(CMD59, CMD59_ARG_ENABLE, self.config.init_cmd_retries);
                    if !Self::r1_ok(r1) {
                        warn!("CMD59 rejected, cannot enable CRC mode (r1 {:#04x})", r1);
                        return Err(InitError::CrcEnable);
                    }
                    self.card.set_crc_enabled(true);
                    InitState::ReadCid
                }
                InitState::ReadCid => {
                    let mut raw = [0u8; CID_CSD_REG_SIZE];
                    self.read_register(CMD10, &mut raw)?;
                    let cid = SdCid::decode(&raw);
                    debug!("CID: {:?}", cid);
                    self.card.set_cid(cid);
                    InitState::ReadCsd
                }
                InitState::ReadCsd => {
                    let mut raw = [0u8; CID_CSD_REG_SIZE];
                    self.read_register(CMD9, &mut raw)?;
                    let csd = SdCsd::decode(&raw);
                    if csd.version() == CsdVersion::Unsupported {
                        return Err(InitError::UnsupportedCsd);
                    }
                    debug!("CSD: {:?}", csd);
                    self.card.set_csd(csd);
                    InitState::SetMaxClock
                }
                InitState::SetMaxClock => {
                    // Purely a parameter for the external SPI driver; no
                    // protocol command involved.
                    self.bus
                        .set_clock(self.config.clock_postinit_hz)
                        .map_err(|_| InitError::Bus)?;
                    InitState::Finish
                }
                InitState::Finish => {
                    self.card.set_initialized(true);
                    info!(
                        "sd card initialized: {:?}, {:?} addressing, {} bytes",
                        self.card.card_type(),
                        self.card.address_mode(),
                        self.card.capacity()
                    );
                    return Ok(());
                }
            };
        }
    }

    /// Applies at least `POWER_SEQUENCE_CLOCK_COUNT` clocks with
    /// chip-select deasserted at the conservative init clock rate.
    fn power_sequence(&mut self) -> Result<(), InitError> {
        self.bus
            .set_clock(self.config.clock_preinit_hz)
            .map_err(|_| InitError::Bus)?;
        self.bus.deselect().map_err(|_| InitError::Bus)?;
        let dummy_bytes = POWER_SEQUENCE_CLOCK_COUNT.div_ceil(8);
        for _ in 0..dummy_bytes {
            self.bus
                .transfer_byte(DUMMY_BYTE)
                .map_err(|_| InitError::Bus)?;
        }
        Ok(())
    }

    /// CMD8: either the card echoes the voltage field and check pattern
    /// (SD v2 path) or rejects the command as illegal (legacy path).
    fn check_interface_condition(&mut self) -> Result<InitState, InitError> {
        let arg = (CMD8_VHS_2_7_TO_3_6_V << 8) | CMD8_CHECK_PATTERN;
        let r1 = self.send_cmd_keep_selected(CMD8, arg, self.config.init_cmd_retries);
        if !R1Response::is_valid_byte(r1) {
            self.end_transaction();
            return Ok(InitState::CardUnknown);
        }
        let flags = R1Response::from_bits_retain(r1);
        if flags.illegal_command() {
            self.end_transaction();
            debug!("CMD8 rejected, legacy (SD v1 / MMC) init path");
            return Ok(InitState::SendAcmd41);
        }
        if flags.has_error() {
            self.end_transaction();
            return Ok(InitState::CardUnknown);
        }

        let mut r7 = [0u8; 4];
        let read = self.bus.recv(&mut r7);
        self.end_transaction();
        read.map_err(|_| InitError::Bus)?;
        let echo_ok = u32::from(r7[2] & 0x0F) == CMD8_VHS_2_7_TO_3_6_V
            && u32::from(r7[3]) == CMD8_CHECK_PATTERN;
        if !echo_ok {
            debug!("CMD8 echo mismatch: {:02x?}", r7);
            return Ok(InitState::CardUnknown);
        }
        Ok(InitState::SendAcmd41Hcs)
    }

    /// Polls ACMD41 until the card leaves idle state. `UnknownCard` is
    /// returned when the card rejects ACMD41 outright, which callers use
    /// to branch to the MMC path. A negative retry budget polls without
    /// bound.
    fn negotiate_acmd41(&mut self, arg: u32) -> Result<(), InitError> {
        let mut tries = self.config.init_cmd_retries;
        loop {
            let r1 = self.send_acmd(ACMD41, arg, 0);
            if R1Response::is_valid_byte(r1) {
                let flags = R1Response::from_bits_retain(r1);
                if flags.illegal_command() {
                    return Err(InitError::UnknownCard);
                }
                if !flags.has_error() && !flags.idle() {
                    return Ok(());
                }
            }
            if tries == 0 {
                warn!("ACMD41 polling exhausted, card still idle");
                return Err(InitError::NegotiationTimeout);
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// MMC fallback: CMD1 polled until the card leaves idle state.
    fn negotiate_cmd1(&mut self) -> Result<(), InitError> {
        let mut tries = self.config.init_cmd_retries;
        loop {
            let r1 = self.send_cmd(CMD1, CMD_ARG_NONE, 0);
            if R1Response::is_valid_byte(r1) {
                let flags = R1Response::from_bits_retain(r1);
                if !flags.has_error() && !flags.idle() {
                    return Ok(());
                }
            }
            if tries == 0 {
                warn!("CMD1 polling exhausted, card still idle");
                return Err(InitError::NegotiationTimeout);
            }
            if tries > 0 {
                tries -= 1;
            }
        }
    }

    /// CMD58: checks power-up status and the voltage window, and picks the
    /// addressing mode from the card-capacity-status bit.
    fn read_operation_conditions(&mut self) -> Result<(), InitError> {
        let r1 = self.send_cmd_keep_selected(CMD58, CMD_ARG_NONE, self.config.init_cmd_retries);
        if !Self::r1_ok(r1) {
            self.end_transaction();
            warn!("CMD58 failed (r1 {:#04x})", r1);
            return Err(InitError::PowerUp);
        }
        let mut raw = [0u8; 4];
        let read = self.bus.recv(&mut raw);
        self.end_transaction();
        read.map_err(|_| InitError::Bus)?;
        let ocr = u32::from_be_bytes(raw);
        debug!("OCR: {:#010x}", ocr);

        if ocr & OCR_POWER_UP_STATUS == 0 {
            return Err(InitError::PowerUp);
        }
        let window = self.config.voltage_window.bits();
        if ocr & window != window {
            warn!(
                "card OCR {:#010x} does not cover host voltage window {:#010x}",
                ocr, window
            );
            return Err(InitError::VoltageMismatch);
        }
        let mode = if ocr & OCR_CCS != 0 {
            AddressMode::Block
        } else {
            AddressMode::Byte
        };
        self.card.set_address_mode(mode);
        Ok(())
    }

    /// CMD16: fixes the 512-byte block length. High-capacity cards are
    /// fixed at 512 by specification; the command is still issued for
    /// protocol conformance but a rejection is only fatal on
    /// byte-addressed cards.
    fn set_block_length(&mut self) -> Result<(), InitError> {
        let r1 = self.send_cmd(
            CMD16,
            SD_BLOCK_SIZE as u32,
            self.config.init_cmd_retries,
        );
        if !Self::r1_ok(r1) {
            if self.card.address_mode() == AddressMode::Byte {
                warn!("CMD16 rejected on byte-addressed card (r1 {:#04x})", r1);
                return Err(InitError::BlockLength);
            }
            debug!("CMD16 rejected on block-addressed card, ignored");
        }
        Ok(())
    }

    /// Reads a fixed 16-byte register (CID or CSD) framed like a data
    /// block: start token, payload, CRC16 trailer.
    fn read_register(
        &mut self,
        cmd: u8,
        raw: &mut [u8; CID_CSD_REG_SIZE],
    ) -> Result<(), InitError> {
        let r1 = self.send_cmd_keep_selected(cmd, CMD_ARG_NONE, self.config.init_cmd_retries);
        if !Self::r1_ok(r1) {
            self.end_transaction();
            warn!("CMD{} failed while reading register (r1 {:#04x})", cmd, r1);
            return Err(InitError::RegisterRead);
        }
        let result = self.read_data_packet(raw);
        self.end_transaction();
        result.map_err(|_| InitError::RegisterRead)
    }

    pub(crate) fn r1_ok(r1: u8) -> bool {
        R1Response::is_valid_byte(r1) && !R1Response::from_bits_retain(r1).has_error()
    }
}
