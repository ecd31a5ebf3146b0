//! Non-blocking frame receive engine.

use bitflags::bitflags;

use crate::crc::{crc16_update, CRC_INIT};
use crate::mailbox::RxMailbox;
use crate::protocol::{CRC_LEN, FRAME_CAPACITY};

bitflags! {
    /// CRC handling for a single receive
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CrcFlags: u8 {
        /// Check the last two bytes against the running CRC of the rest
        const CHECK = 0x01;
        /// Reset the running CRC before this frame
        const RESET = 0x02;
    }
}

/// Outcome of polling the receive engine
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Received {
    /// Still waiting for bytes
    Nothing,
    /// The expected number of bytes arrived (and passed CRC if requested)
    Valid,
    /// The trailing CRC did not match
    Invalid,
    /// No byte arrived for the frame timeout
    Timeout,
}

#[derive(Copy, Clone, PartialEq, Debug)]
enum RxState {
    Idle,
    Waiting,
}

pub struct Receiver {
    state: RxState,
    expected: usize,
    crc: u16,
    frame: [u8; FRAME_CAPACITY],
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            expected: 0,
            crc: CRC_INIT,
            frame: [0u8; FRAME_CAPACITY],
        }
    }

    /// Poll for a frame of `len` bytes.
    ///
    /// The first call arms the receive and always returns [`Received::Nothing`],
    /// later calls report completion. After [`Received::Valid`] the bytes are
    /// available from [`Receiver::frame`] until the next receive completes.
    pub fn receive(&mut self, link: &RxMailbox, len: usize, flags: CrcFlags) -> Received {
        match self.state {
            RxState::Idle => {
                self.expected = len.min(FRAME_CAPACITY);
                link.restart_frame_timer();
                self.state = RxState::Waiting;
                Received::Nothing
            }
            RxState::Waiting => {
                if link.take(&mut self.frame[..self.expected]) {
                    self.state = RxState::Idle;
                    self.complete(flags)
                } else if link.frame_expired() {
                    debug!(
                        "Frame timeout with {}/{} bytes",
                        link.available(),
                        self.expected
                    );
                    link.flush();
                    self.state = RxState::Idle;
                    Received::Timeout
                } else {
                    Received::Nothing
                }
            }
        }
    }

    fn complete(&mut self, flags: CrcFlags) -> Received {
        let frame = &self.frame[..self.expected];
        trace!("Frame {:02x?}", frame);

        if flags.contains(CrcFlags::RESET) {
            self.crc = CRC_INIT;
        }

        if !flags.contains(CrcFlags::CHECK) {
            self.crc = crc16_update(self.crc, frame);
            return Received::Valid;
        }

        if frame.len() < CRC_LEN {
            return Received::Invalid;
        }

        let (payload, trailer) = frame.split_at(frame.len() - CRC_LEN);
        self.crc = crc16_update(self.crc, payload);
        let received = u16::from_be_bytes([trailer[0], trailer[1]]);

        if received == self.crc {
            Received::Valid
        } else {
            debug!("CRC mismatch, received 0x{:04x} computed 0x{:04x}", received, self.crc);
            Received::Invalid
        }
    }

    /// Abandon an armed receive
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
    }

    /// Bytes of the most recently completed frame
    pub fn frame(&self) -> &[u8] {
        &self.frame[..self.expected]
    }

    /// First `N` bytes of the last frame, zero filled past its end
    pub fn head<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        let frame = self.frame();
        let n = frame.len().min(N);
        out[..n].copy_from_slice(&frame[..n]);
        out
    }
}
