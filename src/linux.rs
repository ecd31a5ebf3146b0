//! Linux glue for running the bootloader against a real serial port.

use std::path::Path;
use std::time::Duration;

use embedded_hal::serial::Read;
use linux_embedded_hal::Serial;
use serial_core::{
    BaudRate, CharSize, FlowControl, Parity, SerialDevice as _, SerialPortSettings as _, StopBits,
};

use crate::sim::ImageFlash;
use crate::{Bootloader, Handoff, Layout, MemoryMarker, Options, RxMailbox};

/// Hand-off that ends the process in place of jumping to an application
#[derive(Debug, Default)]
pub struct ProcessHandoff {
    quiesced: bool,
}

impl Handoff for ProcessHandoff {
    fn quiesce(&mut self) {
        info!("Quiescing peripherals");
        self.quiesced = true;
    }

    fn jump_to_application(&mut self) {
        if !self.quiesced {
            warn!("Jumping without quiescing peripherals");
        }
        info!("Jumping to application, exiting simulator");
        std::process::exit(0);
    }
}

pub type LinuxBootloader<'a> = Bootloader<'a, Serial, ImageFlash, ProcessHandoff, MemoryMarker>;

impl<'a> LinuxBootloader<'a> {
    /// Create a bootloader on a linux serial port with a file backed flash image
    pub fn linux<P: AsRef<Path>, I: AsRef<Path>>(
        link: &'a RxMailbox,
        port: P,
        baud: usize,
        image: I,
        layout: Layout,
        boot_tag: u32,
        options: Options,
    ) -> Result<Self, anyhow::Error> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply AN3155 line settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityEven);

        port.0.write_settings(&settings)?;

        // Reads must not stall the tick
        port.0.set_timeout(Duration::from_millis(1))?;

        let flash = ImageFlash::open(image, layout)?;

        // Return instance
        Ok(Self::new(
            link,
            port,
            flash,
            ProcessHandoff::default(),
            MemoryMarker(boot_tag),
            layout,
            options,
        ))
    }
}

/// Move every byte waiting on `port` into `link`, standing in for the receive interrupt
pub fn pump<R: Read<u8>>(port: &mut R, link: &RxMailbox) -> Result<usize, R::Error> {
    let mut n = 0;
    loop {
        match port.read() {
            Ok(b) => {
                link.on_rx_byte(b);
                n += 1;
            }
            Err(nb::Error::WouldBlock) => return Ok(n),
            Err(nb::Error::Other(e)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct ScriptedPort(Vec<nb::Result<u8, ()>>);

    impl Read<u8> for ScriptedPort {
        type Error = ();

        fn read(&mut self) -> nb::Result<u8, ()> {
            if self.0.is_empty() {
                Err(nb::Error::WouldBlock)
            } else {
                self.0.remove(0)
            }
        }
    }

    #[test]
    fn pump_drains_until_would_block() {
        let link = RxMailbox::new();
        let mut port = ScriptedPort(vec![Ok(1), Ok(2), Err(nb::Error::WouldBlock), Ok(3)]);

        assert_eq!(pump(&mut port, &link), Ok(2));
        assert_eq!(pump(&mut port, &link), Ok(1));
        assert_eq!(link.available(), 3);
    }

    #[test]
    fn pump_reports_errors() {
        let link = RxMailbox::new();
        let mut port = ScriptedPort(vec![Ok(1), Err(nb::Error::Other(()))]);
        assert_eq!(pump(&mut port, &link), Err(()));
        assert_eq!(link.available(), 1);
    }
}
