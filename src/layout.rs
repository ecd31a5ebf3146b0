//! Build-time memory map of the target.

/// Application flash region and marker placement
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Layout {
    /// First byte of the application image (vector table)
    pub app_start: u32,
    /// Last byte of the application region, inclusive
    pub app_end: u32,
    /// Flash page size in bytes, a power of two
    pub page_size: u32,
    /// Value of an erased flash byte
    pub erased: u8,
}

impl Layout {
    /// STM32L0 with 192 KiB flash, bootloader in the first 12.5 KiB and
    /// 16 bytes kept free at the end of flash
    pub const STM32L0: Layout = Layout {
        app_start: 0x0800_3200,
        app_end: 0x0802_FFFF - 0x10,
        page_size: 128,
        erased: 0x00,
    };

    /// Address of the application validity marker, the last word of the region
    pub const fn marker_address(&self) -> u32 {
        self.app_end - 3
    }

    /// Start of the page holding the validity marker
    pub const fn marker_page(&self) -> u32 {
        self.page_of(self.marker_address())
    }

    /// Start of the page holding `address`
    pub const fn page_of(&self, address: u32) -> u32 {
        address & !(self.page_size - 1)
    }

    /// Size of the application region in bytes
    pub const fn app_size(&self) -> u32 {
        self.app_end - self.app_start + 1
    }

    /// Whether `len` bytes at `address` lie inside the application region
    pub fn contains(&self, address: u32, len: u32) -> bool {
        address >= self.app_start
            && (address as u64 + len as u64) <= self.app_end as u64 + 1
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::STM32L0
    }
}
