//! CRC-16/ARC as used to terminate protocol fields.

use ::crc::{Crc, CRC_16_ARC};

pub const CRC_INIT: u16 = 0x0000;

static ARC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Advance a running CRC-16/ARC by one byte
pub fn crc16_step(crc: u16, byte: u8) -> u16 {
    crc16_update(crc, &[byte])
}

/// Continue a running CRC-16/ARC over `data`
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    // ARC is reflected, the digest reflects its initial value back
    let mut digest = ARC.digest_with_initial(crc.reverse_bits());
    digest.update(data);
    digest.finalize()
}

/// CRC-16/ARC of a whole buffer
pub fn crc16(data: &[u8]) -> u16 {
    ARC.checksum(data)
}
