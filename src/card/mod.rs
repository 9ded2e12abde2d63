//! Caller-owned card context: identity and geometry captured once by the
//! init sequence, read-only on the transfer hot path.

pub mod cid;
pub mod csd;

use crate::constants::SD_BLOCK_SIZE;

use cid::SdCid;
use csd::SdCsd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Unknown,
    SdV2,
    SdV1,
    MmcV3,
}

/// How block addresses are placed into command arguments. `Block` implies
/// a high-capacity (SDHC/SDXC) card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Byte,
    Block,
}

/// State of one physical card slot. Only `SdSpiDriver::init` mutates the
/// identity fields; everything is an immutable snapshot afterwards.
#[derive(Debug)]
pub struct SdCard {
    card_type: CardType,
    address_mode: AddressMode,
    init_done: bool,
    crc_enabled: bool,
    cid: SdCid,
    csd: SdCsd,
}

impl SdCard {
    pub(crate) fn new() -> Self {
        SdCard {
            card_type: CardType::Unknown,
            address_mode: AddressMode::Byte,
            init_done: false,
            crc_enabled: false,
            cid: SdCid::default(),
            csd: SdCsd::Unsupported,
        }
    }

    /// Drops every negotiated value so a failed init can be retried from
    /// scratch.
    pub(crate) fn reset(&mut self) {
        *self = SdCard::new();
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    pub fn is_initialized(&self) -> bool {
        self.init_done
    }

    pub fn crc_enabled(&self) -> bool {
        self.crc_enabled
    }

    pub fn cid(&self) -> &SdCid {
        &self.cid
    }

    pub fn csd(&self) -> &SdCsd {
        &self.csd
    }

    /// Card capacity in bytes; 0 for an unsupported CSD structure.
    pub fn capacity(&self) -> u64 {
        self.csd.capacity_bytes()
    }

    /// Number of 512-byte sectors the card exposes.
    pub fn sector_count(&self) -> u32 {
        (self.capacity() / SD_BLOCK_SIZE as u64) as u32
    }

    pub(crate) fn set_card_type(&mut self, card_type: CardType) {
        self.card_type = card_type;
    }

    pub(crate) fn set_address_mode(&mut self, mode: AddressMode) {
        self.address_mode = mode;
    }

    pub(crate) fn set_initialized(&mut self, done: bool) {
        self.init_done = done;
    }

    pub(crate) fn set_crc_enabled(&mut self, enabled: bool) {
        self.crc_enabled = enabled;
    }

    pub(crate) fn set_cid(&mut self, cid: SdCid) {
        self.cid = cid;
    }

    pub(crate) fn set_csd(&mut self, csd: SdCsd) {
        self.csd = csd;
    }
}
