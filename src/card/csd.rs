//! Card-specific data register. Two incompatible layouts exist (sd spec
//! 5.3.2 / 5.3.3); the structure field in the top bits selects between
//! them. Fields are pulled out with explicit shifts and masks on the raw
//! 16 bytes rather than bit-field structs, so the layout is independent of
//! compiler packing.

use bitflags::bitflags;
use log::warn;

use crate::constants::CID_CSD_REG_SIZE;

pub const CSD_STRUCTURE_V1: u8 = 0;
pub const CSD_STRUCTURE_V2: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsdVersion {
    V1,
    V2,
    Unsupported,
}

bitflags! {
    /// Single-bit CSD fields, identical between both layouts.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct CsdFlags: u16 {
        const READ_BL_PARTIAL    = 1 << 0;  /* [79] partial block reads allowed */
        const WRITE_BLK_MISALIGN = 1 << 1;  /* [78] */
        const READ_BLK_MISALIGN  = 1 << 2;  /* [77] */
        const DSR_IMP            = 1 << 3;  /* [76] DSR implemented */
        const ERASE_BLK_EN       = 1 << 4;  /* [46] single-block erase */
        const WP_GRP_ENABLE      = 1 << 5;  /* [31] */
        const WRITE_BL_PARTIAL   = 1 << 6;  /* [21] */
        const FILE_FORMAT_GRP    = 1 << 7;  /* [15] */
        const COPY               = 1 << 8;  /* [14] */
        const PERM_WRITE_PROTECT = 1 << 9;  /* [13] */
        const TMP_WRITE_PROTECT  = 1 << 10; /* [12] */
    }
}

/// CSD version 1.0 layout, used by standard-capacity (<= 2 GB) cards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CsdV1 {
    pub taac: u8,
    pub nsac: u8,
    pub tran_speed: u8,
    pub ccc: u16,
    pub read_bl_len: u8,
    pub c_size: u16,
    pub vdd_r_curr_min: u8,
    pub vdd_r_curr_max: u8,
    pub vdd_w_curr_min: u8,
    pub vdd_w_curr_max: u8,
    pub c_size_mult: u8,
    pub sector_size: u8,
    pub wp_grp_size: u8,
    pub r2w_factor: u8,
    pub write_bl_len: u8,
    pub file_format: u8,
    pub flags: CsdFlags,
    pub crc: u8,
}

/// CSD version 2.0 layout, used by high-capacity (SDHC/SDXC) cards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CsdV2 {
    pub taac: u8,
    pub nsac: u8,
    pub tran_speed: u8,
    pub ccc: u16,
    pub read_bl_len: u8,
    pub c_size: u32,
    pub sector_size: u8,
    pub wp_grp_size: u8,
    pub r2w_factor: u8,
    pub write_bl_len: u8,
    pub file_format: u8,
    pub flags: CsdFlags,
    pub crc: u8,
}

/// Decoded CSD register, tagged by the structure version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdCsd {
    V1(CsdV1),
    V2(CsdV2),
    Unsupported,
}

fn common_flags(raw: &[u8; CID_CSD_REG_SIZE]) -> CsdFlags {
    let mut flags = CsdFlags::empty();
    flags.set(CsdFlags::READ_BL_PARTIAL, raw[6] & 0x80 != 0);
    flags.set(CsdFlags::WRITE_BLK_MISALIGN, raw[6] & 0x40 != 0);
    flags.set(CsdFlags::READ_BLK_MISALIGN, raw[6] & 0x20 != 0);
    flags.set(CsdFlags::DSR_IMP, raw[6] & 0x10 != 0);
    flags.set(CsdFlags::ERASE_BLK_EN, raw[10] & 0x40 != 0);
    flags.set(CsdFlags::WP_GRP_ENABLE, raw[12] & 0x80 != 0);
    flags.set(CsdFlags::WRITE_BL_PARTIAL, raw[13] & 0x20 != 0);
    flags.set(CsdFlags::FILE_FORMAT_GRP, raw[14] & 0x80 != 0);
    flags.set(CsdFlags::COPY, raw[14] & 0x40 != 0);
    flags.set(CsdFlags::PERM_WRITE_PROTECT, raw[14] & 0x20 != 0);
    flags.set(CsdFlags::TMP_WRITE_PROTECT, raw[14] & 0x10 != 0);
    flags
}

impl CsdV1 {
    pub fn decode(raw: &[u8; CID_CSD_REG_SIZE]) -> Self {
        CsdV1 {
            taac: raw[1],
            nsac: raw[2],
            tran_speed: raw[3],
            ccc: (u16::from(raw[4]) << 4) | u16::from(raw[5] >> 4),
            read_bl_len: raw[5] & 0x0F,
            c_size: (u16::from(raw[6] & 0x03) << 10)
                | (u16::from(raw[7]) << 2)
                | u16::from(raw[8] >> 6),
            vdd_r_curr_min: (raw[8] >> 3) & 0x07,
            vdd_r_curr_max: raw[8] & 0x07,
            vdd_w_curr_min: raw[9] >> 5,
            vdd_w_curr_max: (raw[9] >> 2) & 0x07,
            c_size_mult: ((raw[9] & 0x03) << 1) | (raw[10] >> 7),
            sector_size: ((raw[10] & 0x3F) << 1) | (raw[11] >> 7),
            wp_grp_size: raw[11] & 0x7F,
            r2w_factor: (raw[12] >> 2) & 0x07,
            write_bl_len: ((raw[12] & 0x03) << 2) | (raw[13] >> 6),
            file_format: (raw[14] >> 2) & 0x03,
            flags: common_flags(raw),
            crc: raw[15] >> 1,
        }
    }

    /// `(C_SIZE + 1) << (C_SIZE_MULT + 2) << READ_BL_LEN` bytes.
    pub fn capacity_bytes(&self) -> u64 {
        (u64::from(self.c_size) + 1) << (self.c_size_mult + 2) << self.read_bl_len
    }
}

impl CsdV2 {
    pub fn decode(raw: &[u8; CID_CSD_REG_SIZE]) -> Self {
        CsdV2 {
            taac: raw[1],
            nsac: raw[2],
            tran_speed: raw[3],
            ccc: (u16::from(raw[4]) << 4) | u16::from(raw[5] >> 4),
            read_bl_len: raw[5] & 0x0F,
            c_size: (u32::from(raw[7] & 0x3F) << 16)
                | (u32::from(raw[8]) << 8)
                | u32::from(raw[9]),
            sector_size: ((raw[10] & 0x3F) << 1) | (raw[11] >> 7),
            wp_grp_size: raw[11] & 0x7F,
            r2w_factor: (raw[12] >> 2) & 0x07,
            write_bl_len: ((raw[12] & 0x03) << 2) | (raw[13] >> 6),
            file_format: (raw[14] >> 2) & 0x03,
            flags: common_flags(raw),
            crc: raw[15] >> 1,
        }
    }

    /// `(C_SIZE + 1)` times 512 KiB.
    pub fn capacity_bytes(&self) -> u64 {
        (u64::from(self.c_size) + 1) * 512 * 1024
    }
}

impl SdCsd {
    pub fn decode(raw: &[u8; CID_CSD_REG_SIZE]) -> Self {
        match raw[0] >> 6 {
            CSD_STRUCTURE_V1 => SdCsd::V1(CsdV1::decode(raw)),
            CSD_STRUCTURE_V2 => SdCsd::V2(CsdV2::decode(raw)),
            version => {
                warn!("unsupported CSD structure version {}", version);
                SdCsd::Unsupported
            }
        }
    }

    pub fn version(&self) -> CsdVersion {
        match self {
            SdCsd::V1(_) => CsdVersion::V1,
            SdCsd::V2(_) => CsdVersion::V2,
            SdCsd::Unsupported => CsdVersion::Unsupported,
        }
    }

    /// Capacity in bytes; an unsupported structure decodes to 0 instead of
    /// poisoning the caller with stale values.
    pub fn capacity_bytes(&self) -> u64 {
        match self {
            SdCsd::V1(csd) => csd.capacity_bytes(),
            SdCsd::V2(csd) => csd.capacity_bytes(),
            SdCsd::Unsupported => 0,
        }
    }
}
