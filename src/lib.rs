//! STM32 Resident UART Bootloader.
//!
//! Core of an in-field update bootloader speaking an AN3155-style protocol
//! with CRC16 framed fields and a challenge-response unlock in front of
//! flash access. Hardware drivers are supplied through the [`Flash`],
//! [`Handoff`] and [`Marker`] traits and an `embedded-hal` serial writer,
//! received bytes and timer ticks arrive through an [`RxMailbox`].
//!
//! ```ignore
//! static LINK: RxMailbox = RxMailbox::new();
//!
//! // serial rx interrupt: LINK.on_rx_byte(byte)
//! // 1 ms timer interrupt: LINK.tick()
//!
//! let mut b = Bootloader::new(&LINK, tx, flash, handoff, boot_tag, Layout::STM32L0, Options::default());
//! b.start();
//! loop {
//!     b.poll()?;
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

extern crate embedded_hal;
extern crate nb;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod auth;
pub mod boot;
pub mod bootloader;
pub mod cipher;
pub mod crc;
pub mod executor;
pub mod layout;
pub mod mailbox;
pub mod platform;
pub mod protocol;
pub mod receive;

#[cfg(feature = "std")]
pub mod sim;

#[cfg(feature = "linux")]
pub mod linux;

pub use boot::BootDecision;
pub use bootloader::{Bootloader, State};
pub use executor::{CommandError, Executor};
pub use layout::Layout;
pub use mailbox::RxMailbox;
pub use platform::{Flash, FlashError, Handoff, Marker, MemoryMarker, VolatileMarker};
pub use protocol::{Command, UART_ACK, UART_NACK};

/// Failures of the serial link while running a session
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error<SerialError> {
    #[cfg_attr(feature = "std", error("serial error: {0:?}"))]
    Serial(SerialError),
    /// A reply could not be sent within the transmit spin limit
    #[cfg_attr(feature = "std", error("transmit timeout"))]
    TxTimeout,
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

/// Frame-level failures, these abort the command in progress
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ProtocolError {
    #[cfg_attr(feature = "std", error("invalid CRC"))]
    InvalidCrc,
    #[cfg_attr(feature = "std", error("frame timeout"))]
    Timeout,
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Time allowed after the last received byte before a frame is abandoned
    #[cfg_attr(feature = "structopt", structopt(long, default_value="100"))]
    pub frame_timeout_ms: u32,

    /// Time without traffic before the bootloader tries to start the application
    #[cfg_attr(feature = "structopt", structopt(long, default_value="60000"))]
    pub idle_timeout_ms: u32,

    /// Transmitter polls per byte before a reply is abandoned
    #[cfg_attr(feature = "structopt", structopt(long, default_value="100000"))]
    pub tx_spin_limit: u32,
}

impl Options {
    pub const FRAME_TIMEOUT_MS: u32 = 100;
    pub const IDLE_TIMEOUT_MS: u32 = 60_000;
    pub const TX_SPIN_LIMIT: u32 = 100_000;
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frame_timeout_ms: Self::FRAME_TIMEOUT_MS,
            idle_timeout_ms: Self::IDLE_TIMEOUT_MS,
            tx_spin_limit: Self::TX_SPIN_LIMIT,
        }
    }
}
