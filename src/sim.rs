//! Host-side flash model for simulation and tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::layout::Layout;
use crate::platform::{Flash, FlashError};

/// Application flash region backed by memory and optionally by an image file.
///
/// Words can only be programmed while erased, like STM32 flash. Reads outside
/// the region return erased bytes.
pub struct ImageFlash {
    layout: Layout,
    image: Vec<u8>,
    path: Option<PathBuf>,
}

impl ImageFlash {
    /// A fully erased region
    pub fn blank(layout: Layout) -> Self {
        Self {
            layout,
            image: vec![layout.erased; layout.app_size() as usize],
            path: None,
        }
    }

    /// Open an image file, creating or extending it to the region size
    pub fn open<P: AsRef<Path>>(path: P, layout: Layout) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut image = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(e),
        };

        let size = layout.app_size() as usize;
        if image.len() > size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image is {} bytes, region holds {}", image.len(), size),
            ));
        }
        image.resize(size, layout.erased);

        let f = Self {
            layout,
            image,
            path: Some(path),
        };
        f.sync()?;
        Ok(f)
    }

    /// Raw region contents
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn offset(&self, address: u32) -> usize {
        (address - self.layout.app_start) as usize
    }

    fn sync(&self) -> io::Result<()> {
        match &self.path {
            Some(p) => fs::write(p, &self.image),
            None => Ok(()),
        }
    }

    fn persist(&self) -> Result<(), FlashError> {
        self.sync().map_err(|e| {
            error!("Failed to update image file: {}", e);
            FlashError::Generic
        })
    }
}

impl Flash for ImageFlash {
    fn erase(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.layout.contains(address, 1) {
            return Err(FlashError::Generic);
        }

        let start = self.offset(self.layout.page_of(address).max(self.layout.app_start));
        let erased = self.layout.erased;
        for b in self.image[start..].iter_mut() {
            *b = erased;
        }

        debug!("Erased 0x{:08x}..=0x{:08x}", self.layout.app_start + start as u32, self.layout.app_end);
        self.persist()
    }

    fn write(&mut self, address: u32, words: &[u32]) -> Result<(), FlashError> {
        if address % 4 != 0 {
            return Err(FlashError::Generic);
        }
        if !self.layout.contains(address, words.len() as u32 * 4) {
            return Err(FlashError::SizeTooLarge);
        }

        let erased = u32::from_le_bytes([self.layout.erased; 4]);
        let start = self.offset(address);

        for (i, w) in words.iter().enumerate() {
            let at = start + i * 4;
            let cell = &mut self.image[at..at + 4];
            if u32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]) != erased {
                warn!("Programming non-erased word at 0x{:08x}", address + i as u32 * 4);
                return Err(FlashError::WriteFailed);
            }
            cell.copy_from_slice(&w.to_le_bytes());
        }

        let readback = &self.image[start..start + words.len() * 4];
        if readback.chunks_exact(4).zip(words).any(|(c, w)| c != w.to_le_bytes()) {
            return Err(FlashError::ReadbackMismatch);
        }

        self.persist()
    }

    fn read(&mut self, address: u32, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            let a = address.wrapping_add(i as u32);
            *b = if self.layout.contains(a, 1) {
                self.image[self.offset(a)]
            } else {
                self.layout.erased
            };
        }
    }
}
