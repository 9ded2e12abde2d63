//! Software CRC routines protecting the SPI link: CRC7 over command frames
//! and CRC16 (CCITT/XMODEM) over data blocks.

/// Computes the CRC7 of `data` and returns the final command-frame byte,
/// i.e. the 7-bit checksum shifted up with the stop bit in the LSB.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut byte in data.iter().copied() {
        for _ in 0..8 {
            crc <<= 1;
            if ((byte ^ crc) & 0x80) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    (crc << 1) | 1
}

/// CRC16 as used for SD data blocks (polynomial 0x1021, init 0).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = (crc >> 8) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}
