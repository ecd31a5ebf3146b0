//! Fake collaborators and a scripted host for session tests.

#![allow(dead_code)]

use std::convert::Infallible;

use stm32_uart_bootloader::cipher::{decrypt, encrypt, host};
use stm32_uart_bootloader::crc::crc16;
use stm32_uart_bootloader::protocol::*;
use stm32_uart_bootloader::sim::ImageFlash;
use stm32_uart_bootloader::{Bootloader, Flash, Handoff, Layout, MemoryMarker, Options, RxMailbox, State};

pub const L: Layout = Layout::STM32L0;

/// Serial writer that records everything sent
#[derive(Default)]
pub struct Wire {
    pub sent: Vec<u8>,
}

impl embedded_hal::serial::Write<u8> for Wire {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.sent.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

/// Hand-off that records calls instead of leaving
#[derive(Default)]
pub struct RecordingHandoff {
    pub events: Vec<&'static str>,
}

impl RecordingHandoff {
    pub fn jumps(&self) -> usize {
        self.events.iter().filter(|e| **e == "jump").count()
    }
}

impl Handoff for RecordingHandoff {
    fn quiesce(&mut self) {
        self.events.push("quiesce");
    }

    fn jump_to_application(&mut self) {
        self.events.push("jump");
    }
}

pub type TestBootloader<'a> = Bootloader<'a, Wire, ImageFlash, RecordingHandoff, MemoryMarker>;

/// Scripted host driving a bootloader session
pub struct Host<'a> {
    pub link: &'a RxMailbox,
    pub b: TestBootloader<'a>,
}

impl<'a> Host<'a> {
    pub fn new(link: &'a RxMailbox) -> Self {
        Self::with_flash(link, ImageFlash::blank(L), ENTERED_FROM_APPLICATION)
    }

    pub fn with_flash(link: &'a RxMailbox, flash: ImageFlash, boot_tag: u32) -> Self {
        let b = Bootloader::new(
            link,
            Wire::default(),
            flash,
            RecordingHandoff::default(),
            MemoryMarker(boot_tag),
            L,
            Options::default(),
        );
        Self { link, b }
    }

    pub fn poll(&mut self) {
        self.b.poll().unwrap();
    }

    /// Deliver raw bytes, let the bootloader consume them and collect the reply
    pub fn raw(&mut self, bytes: &[u8]) -> Vec<u8> {
        for b in bytes {
            self.link.on_rx_byte(*b);
        }
        for _ in 0..3 {
            self.poll();
        }
        std::mem::take(&mut self.b.serial().sent)
    }

    /// Deliver a field followed by its CRC
    pub fn field(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.raw(&with_crc(bytes))
    }

    pub fn command(&mut self, c: u8) -> Vec<u8> {
        self.field(&[c])
    }

    pub fn tick(&mut self, ms: u32) {
        for _ in 0..ms {
            self.link.tick();
            self.poll();
        }
    }

    pub fn state(&self) -> State {
        self.b.state()
    }

    pub fn flash(&mut self) -> &mut ImageFlash {
        self.b.executor().flash()
    }

    pub fn handoff(&mut self) -> &mut RecordingHandoff {
        self.b.executor().handoff()
    }

    /// Run RANDOMIZE and answer it, corrupting the answer if asked
    pub fn authenticate(&mut self, corrupt: bool) -> Vec<u8> {
        let reply = self.command(Command::Randomize as u8);
        assert_eq!(reply.len(), 1 + CHALLENGE_LEN);
        assert_eq!(reply[0], UART_ACK);
        assert_eq!(self.state(), State::RandomizeReceiveResponse);

        let mut response = answer(&reply[1..]);
        if corrupt {
            response[3] ^= 0x04;
        }
        self.field(&response)
    }

    /// Full WRITE exchange, returns every reply byte
    pub fn write(&mut self, address: u32, data: &[u8]) -> Vec<u8> {
        let mut replies = self.command(Command::WriteMemory as u8);
        replies.extend(self.field(&address.to_be_bytes()));

        let len = (data.len() - 1) as u8;
        replies.extend(self.raw(&[len]));

        // CRC runs over the length byte and the data
        let mut crc_input = vec![len];
        crc_input.extend_from_slice(data);
        let mut frame = data.to_vec();
        frame.extend_from_slice(&crc16(&crc_input).to_be_bytes());
        replies.extend(self.raw(&frame));
        replies
    }

    /// Full READ exchange, returns every reply byte
    pub fn read(&mut self, address: u32, len: usize) -> Vec<u8> {
        let mut replies = self.command(Command::ReadMemory as u8);
        replies.extend(self.field(&address.to_be_bytes()));
        replies.extend(self.field(&[(len - 1) as u8]));
        replies
    }

    /// Full extended ERASE exchange, `pages` is sent for page-selective modes
    pub fn erase(&mut self, mode: u16, pages: Option<u16>) -> Vec<u8> {
        let mut replies = self.command(Command::ExtendedErase as u8);

        let mut crc_input = mode.to_be_bytes().to_vec();
        replies.extend(self.raw(&mode.to_be_bytes()));
        if let Some(p) = pages {
            crc_input.extend_from_slice(&p.to_be_bytes());
            replies.extend(self.raw(&p.to_be_bytes()));
        }
        replies.extend(self.raw(&crc16(&crc_input).to_be_bytes()));
        replies
    }

    pub fn go(&mut self, address: u32) -> Vec<u8> {
        let mut replies = self.command(Command::Go as u8);
        replies.extend(self.field(&address.to_be_bytes()));
        replies
    }
}

pub fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut v = data.to_vec();
    v.extend_from_slice(&crc16(data).to_be_bytes());
    v
}

/// Answer a challenge the way a paired host does
pub fn answer(challenge: &[u8]) -> [u8; CHALLENGE_LEN] {
    let mut plain = [0u8; 4];
    decrypt(challenge, &mut plain, host::CHALLENGE_KEY);
    let mut response = [0u8; CHALLENGE_LEN];
    encrypt(&plain, &mut response, host::RESPONSE_KEY);
    response
}

/// Blank flash with the validity marker already stamped
pub fn installed_flash() -> ImageFlash {
    let mut f = ImageFlash::blank(L);
    f.write(L.app_start, &[0x2000_5000, 0x0800_32C1]).unwrap();
    f.write(L.marker_address(), &[VALID_APPLICATION]).unwrap();
    f
}
