//! Wire-level constants for the resident UART bootloader.
//!
//! The framing follows AN3155 (ACK/NACK bytes, command codes, big-endian
//! addresses, `N-1` length bytes) but every field is terminated by a
//! CRC16/ARC instead of the factory XOR checksum.

use core::convert::TryFrom;

pub const UART_ACK: u8 = 0x79;
pub const UART_NACK: u8 = 0x1F;

/// Capacity of the shared frame buffer
pub const FRAME_CAPACITY: usize = 280;

pub const CRC_LEN: usize = 2;
pub const COMMAND_LEN: usize = 1;
pub const ADDRESS_LEN: usize = 4;
pub const LENGTH_LEN: usize = 1;
pub const ERASE_MODE_LEN: usize = 2;
pub const ERASE_PAGES_LEN: usize = 2;
/// Length of an encrypted challenge or response
pub const CHALLENGE_LEN: usize = 8;

/// Erase mode values at or above this select a whole-region erase
pub const ERASE_MODE_SPECIAL: u16 = 0xFFF0;
pub const ERASE_MODE_GLOBAL: u16 = 0xFFFF;
pub const ERASE_MODE_BANK1: u16 = 0xFFFE;
pub const ERASE_MODE_BANK2: u16 = 0xFFFD;

/// WRITE to this address erases the page holding the validity marker
pub const CLEAR_MARKER_ADDRESS: u32 = 0xFFFF_FFFE;
/// WRITE to this address is redirected onto the validity marker
pub const SET_MARKER_ADDRESS: u32 = 0xFFFF_FFFF;

pub const BOOTLOADER_VERSION: u8 = 0x10;
pub const DEVICE_ID: u16 = 0x3344;

/// Validity marker value stamped at the end of a complete application image
pub const VALID_APPLICATION: u32 = 0x5555_5555;
/// BootTag value written by the application before resetting into the bootloader
pub const ENTERED_FROM_APPLICATION: u32 = 0xAABB_CCDD;

/// Response to [`Command::Get`]: count-minus-one, version, supported commands
pub const CAPABILITIES: [u8; 10] = [
    8,
    BOOTLOADER_VERSION,
    Command::ReadMemory as u8,
    Command::WriteMemory as u8,
    Command::ReadoutUnprotect as u8,
    Command::WriteUnprotect as u8,
    Command::Go as u8,
    Command::GetId as u8,
    Command::Get as u8,
    Command::ExtendedErase as u8,
];

/// Response to [`Command::GetId`]: count-minus-one then the big-endian id
pub const DEVICE_ID_REPLY: [u8; 3] = [1, (DEVICE_ID >> 8) as u8, DEVICE_ID as u8];

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Fetch bootloader version and allowed commands
    Get = 0x00,

    /// Gets the chip ID
    GetId = 0x02,

    /// Reads up to 256 bytes of memory starting from an address specified by the host.
    ReadMemory = 0x11,

    /// Jumps to the installed application.
    Go = 0x21,

    /// Writes up to 256 bytes to flash starting from an address specified by the host.
    WriteMemory = 0x31,

    /// Erases flash using two byte addressing mode.
    ExtendedErase = 0x44,

    /// Disables the write protection for all Flash memory sectors (advertised only)
    WriteUnprotect = 0x73,

    /// Disables the read protection (advertised only)
    ReadoutUnprotect = 0x92,

    /// Issues an encrypted challenge, the host's answer follows as the next field.
    Randomize = 0x93,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let c = match v {
            0x00 => Command::Get,
            0x02 => Command::GetId,
            0x11 => Command::ReadMemory,
            0x21 => Command::Go,
            0x31 => Command::WriteMemory,
            0x44 => Command::ExtendedErase,
            0x73 => Command::WriteUnprotect,
            0x92 => Command::ReadoutUnprotect,
            0x93 => Command::Randomize,
            _ => return Err(v),
        };
        Ok(c)
    }
}

/// Decode a big-endian address field
pub fn address(field: &[u8; ADDRESS_LEN]) -> u32 {
    u32::from_be_bytes(*field)
}

/// Decode a big-endian 16-bit field
pub fn half_word(field: &[u8; 2]) -> u16 {
    u16::from_be_bytes(*field)
}
