//! Card identification register (sd spec 5.2). All fields are byte
//! aligned, so the decode is a straight byte-to-field mapping.

use crate::constants::CID_CSD_REG_SIZE;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SdCid {
    /// Manufacturer ID
    pub manufacturer_id: u8,
    /// OEM/application ID, two ASCII characters
    pub oem_id: [u8; 2],
    /// Product name, five ASCII characters
    pub product_name: [u8; 5],
    /// Product revision, BCD major.minor
    pub product_revision: u8,
    /// Product serial number
    pub serial_number: u32,
    /// Manufacturing date, 12 bits: year offset from 2000 and month
    pub manufacturing_date: u16,
    /// CRC7 checksum over the first 15 bytes
    pub crc: u8,
}

impl SdCid {
    pub fn decode(raw: &[u8; CID_CSD_REG_SIZE]) -> Self {
        SdCid {
            manufacturer_id: raw[0],
            oem_id: [raw[1], raw[2]],
            product_name: [raw[3], raw[4], raw[5], raw[6], raw[7]],
            product_revision: raw[8],
            serial_number: u32::from_be_bytes([raw[9], raw[10], raw[11], raw[12]]),
            manufacturing_date: (u16::from(raw[13] & 0x0F) << 8) | u16::from(raw[14]),
            crc: raw[15] >> 1,
        }
    }

    pub fn manufacturing_year(&self) -> u16 {
        2000 + (self.manufacturing_date >> 4)
    }

    pub fn manufacturing_month(&self) -> u8 {
        (self.manufacturing_date & 0x0F) as u8
    }
}
