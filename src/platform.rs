//! Collaborators the bootloader core drives: flash, control hand-off and
//! persisted markers.

/// Flash driver failures, each maps to a driver status code
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum FlashError {
    /// The data does not fit in the application region
    #[cfg_attr(feature = "std", error("image too large for application region"))]
    SizeTooLarge,
    /// Programming failed
    #[cfg_attr(feature = "std", error("flash write failed"))]
    WriteFailed,
    /// Programming succeeded but the memory content is wrong
    #[cfg_attr(feature = "std", error("flash readback mismatch"))]
    ReadbackMismatch,
    /// Any other driver failure
    #[cfg_attr(feature = "std", error("flash error"))]
    Generic,
}

impl FlashError {
    /// Driver status code
    pub fn status(&self) -> u8 {
        match self {
            FlashError::SizeTooLarge => 0x01,
            FlashError::WriteFailed => 0x02,
            FlashError::ReadbackMismatch => 0x04,
            FlashError::Generic => 0xFF,
        }
    }
}

/// Flash driver
pub trait Flash {
    /// Erase every page from the one holding `address` to the end of the application region
    fn erase(&mut self, address: u32) -> Result<(), FlashError>;

    /// Program consecutive 32-bit words starting at `address`
    fn write(&mut self, address: u32, words: &[u32]) -> Result<(), FlashError>;

    /// Copy `data.len()` bytes starting at `address`
    fn read(&mut self, address: u32, data: &mut [u8]);
}

/// Transfer of control out of the bootloader
pub trait Handoff {
    /// Park peripherals before jumping, called exactly once per jump
    fn quiesce(&mut self);

    /// Relocate the vector table and jump to the application.
    ///
    /// Does not return on hardware, implementations used for testing return
    /// so the caller can observe the attempt.
    fn jump_to_application(&mut self);
}

/// A 32-bit sentinel in persisted storage
pub trait Marker {
    fn read(&self) -> u32;

    fn write(&mut self, value: u32);

    fn clear(&mut self) {
        self.write(0)
    }
}

/// Marker held in ordinary memory, for hosts and tests
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MemoryMarker(pub u32);

impl Marker for MemoryMarker {
    fn read(&self) -> u32 {
        self.0
    }

    fn write(&mut self, value: u32) {
        self.0 = value
    }
}

/// Marker at a fixed memory address, such as a word of no-init RAM
#[derive(Debug)]
pub struct VolatileMarker {
    address: *mut u32,
}

impl VolatileMarker {
    /// # Safety
    ///
    /// `address` must be a valid, aligned word that nothing else in the
    /// bootloader uses (typically the last word of RAM, excluded from the
    /// linker script).
    pub const unsafe fn new(address: usize) -> Self {
        Self {
            address: address as *mut u32,
        }
    }
}

impl Marker for VolatileMarker {
    fn read(&self) -> u32 {
        // Safety: address validity is guaranteed by the constructor contract
        unsafe { core::ptr::read_volatile(self.address) }
    }

    fn write(&mut self, value: u32) {
        // Safety: address validity is guaranteed by the constructor contract
        unsafe { core::ptr::write_volatile(self.address, value) }
    }
}
