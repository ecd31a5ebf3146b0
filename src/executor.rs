//! Executes fully received, CRC-checked commands.
//!
//! Failures are reported as [`CommandError`] for logging only, the protocol
//! layer turns every one of them into the same NACK.

use crate::auth::Authenticator;
use crate::layout::Layout;
use crate::platform::{Flash, FlashError, Handoff, Marker};
use crate::protocol::*;

#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum CommandError {
    /// READ, WRITE or ERASE before a successful challenge-response
    #[cfg_attr(feature = "std", error("host not authorized"))]
    Unauthorized,
    #[cfg_attr(feature = "std", error("flash: {0}"))]
    Flash(FlashError),
    /// GO without a valid application marker
    #[cfg_attr(feature = "std", error("no valid application installed"))]
    InvalidApplication,
    #[cfg_attr(feature = "std", error("erase mode 0x{0:04x} not supported"))]
    UnsupportedEraseMode(u16),
    #[cfg_attr(feature = "std", error("challenge response mismatch"))]
    AuthenticationFailed,
}

impl From<FlashError> for CommandError {
    fn from(e: FlashError) -> Self {
        CommandError::Flash(e)
    }
}

pub struct Executor<F, H, T> {
    flash: F,
    handoff: H,
    boot_tag: T,
    layout: Layout,
    auth: Authenticator,
}

impl<F, H, T> Executor<F, H, T>
where
    F: Flash,
    H: Handoff,
    T: Marker,
{
    pub fn new(flash: F, handoff: H, boot_tag: T, layout: Layout) -> Self {
        Self {
            flash,
            handoff,
            boot_tag,
            layout,
            auth: Authenticator::new(),
        }
    }

    /// Capability report for GET
    pub fn get(&self) -> [u8; 10] {
        CAPABILITIES
    }

    /// Identifier report for GET_ID
    pub fn get_id(&self) -> [u8; 3] {
        DEVICE_ID_REPLY
    }

    /// Copy flash at `address` into `data`
    pub fn read(&mut self, address: u32, data: &mut [u8]) -> Result<(), CommandError> {
        self.require_authorized()?;

        debug!("Read {} bytes at 0x{:08x}", data.len(), address);
        self.flash.read(address, data);

        Ok(())
    }

    /// Program `data` at `address`, honouring the marker addresses
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), CommandError> {
        self.require_authorized()?;

        if address == CLEAR_MARKER_ADDRESS {
            let page = self.layout.marker_page();
            info!("Clearing application marker (page 0x{:08x})", page);
            return Ok(self.flash.erase(page)?);
        }

        let address = if address == SET_MARKER_ADDRESS {
            info!("Writing application marker");
            self.layout.marker_address()
        } else {
            address
        };

        let mut words = [0u32; FRAME_CAPACITY / 4];
        let count = data.len() / 4;
        for (w, c) in words.iter_mut().zip(data.chunks_exact(4)) {
            *w = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
        }

        debug!("Write {} words at 0x{:08x}", count, address);
        self.flash.write(address, &words[..count]).map_err(|e| {
            warn!("Write at 0x{:08x} failed: {:?}", address, e);
            CommandError::from(e)
        })
    }

    /// Extended erase, only the global mode is carried out
    pub fn erase(&mut self, mode: u16, pages: u16) -> Result<(), CommandError> {
        self.require_authorized()?;

        match mode {
            ERASE_MODE_GLOBAL => {
                info!("Erasing application from 0x{:08x}", self.layout.app_start);
                Ok(self.flash.erase(self.layout.app_start)?)
            }
            ERASE_MODE_BANK1 | ERASE_MODE_BANK2 => {
                warn!("Bank erase 0x{:04x} not supported", mode);
                Err(CommandError::UnsupportedEraseMode(mode))
            }
            _ => {
                warn!("Page erase (mode 0x{:04x}, page field 0x{:04x}) not supported", mode, pages);
                Err(CommandError::UnsupportedEraseMode(mode))
            }
        }
    }

    /// Whether the validity marker holds [`VALID_APPLICATION`]
    pub fn application_valid(&mut self) -> bool {
        let mut marker = [0u8; 4];
        self.flash.read(self.layout.marker_address(), &mut marker);
        u32::from_le_bytes(marker) == VALID_APPLICATION
    }

    /// Jump to the application if one is installed.
    ///
    /// On hardware this only returns on failure.
    pub fn go(&mut self) -> Result<(), CommandError> {
        if !self.application_valid() {
            warn!("Not starting application, marker invalid");
            return Err(CommandError::InvalidApplication);
        }

        self.launch();
        Ok(())
    }

    /// Clear the BootTag, quiesce and jump without checking the marker
    pub(crate) fn launch(&mut self) {
        info!("Starting application at 0x{:08x}", self.layout.app_start);
        self.boot_tag.clear();
        self.handoff.quiesce();
        self.handoff.jump_to_application();
    }

    /// Issue an encrypted challenge for RANDOMIZE
    pub fn randomize(&mut self, seed: u16) -> [u8; CHALLENGE_LEN] {
        self.auth.issue_challenge(seed)
    }

    /// Check the host's answer to the last challenge
    pub fn authorize(&mut self, response: &[u8; CHALLENGE_LEN]) -> Result<(), CommandError> {
        if self.auth.verify_response(response) {
            Ok(())
        } else {
            Err(CommandError::AuthenticationFailed)
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.auth.is_authorized()
    }

    fn require_authorized(&self) -> Result<(), CommandError> {
        if self.auth.is_authorized() {
            Ok(())
        } else {
            debug!("Rejecting command, host not authorized");
            Err(CommandError::Unauthorized)
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn handoff(&mut self) -> &mut H {
        &mut self.handoff
    }

    pub fn boot_tag(&mut self) -> &mut T {
        &mut self.boot_tag
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::test::answer;
    use crate::platform::MemoryMarker;

    #[derive(Default)]
    struct DummyFlash {
        erased: Vec<u32>,
        written: Vec<(u32, Vec<u32>)>,
        marker: u32,
        fail: Option<FlashError>,
    }

    impl Flash for DummyFlash {
        fn erase(&mut self, address: u32) -> Result<(), FlashError> {
            self.erased.push(address);
            self.fail.map_or(Ok(()), Err)
        }

        fn write(&mut self, address: u32, words: &[u32]) -> Result<(), FlashError> {
            self.written.push((address, words.to_vec()));
            self.fail.map_or(Ok(()), Err)
        }

        fn read(&mut self, address: u32, data: &mut [u8]) {
            if address == Layout::STM32L0.marker_address() {
                data.copy_from_slice(&self.marker.to_le_bytes());
            } else {
                for (i, b) in data.iter_mut().enumerate() {
                    *b = address.wrapping_add(i as u32) as u8;
                }
            }
        }
    }

    #[derive(Default)]
    struct DummyHandoff {
        events: Vec<&'static str>,
    }

    impl Handoff for DummyHandoff {
        fn quiesce(&mut self) {
            self.events.push("quiesce");
        }

        fn jump_to_application(&mut self) {
            self.events.push("jump");
        }
    }

    type TestExecutor = Executor<DummyFlash, DummyHandoff, MemoryMarker>;

    fn executor() -> TestExecutor {
        Executor::new(
            DummyFlash::default(),
            DummyHandoff::default(),
            MemoryMarker(ENTERED_FROM_APPLICATION),
            Layout::STM32L0,
        )
    }

    fn authorized() -> TestExecutor {
        let mut e = executor();
        let challenge = e.randomize(99);
        e.authorize(&answer(&challenge)).unwrap();
        e
    }

    #[test]
    fn gated_commands_require_authorization() {
        let mut e = executor();
        let mut buf = [0u8; 4];

        assert_eq!(e.read(0x0800_3200, &mut buf), Err(CommandError::Unauthorized));
        assert_eq!(e.write(0x0800_3200, &[0; 4]), Err(CommandError::Unauthorized));
        assert_eq!(e.erase(ERASE_MODE_GLOBAL, 0), Err(CommandError::Unauthorized));
        assert!(e.flash().erased.is_empty());
        assert!(e.flash().written.is_empty());
    }

    #[test]
    fn read_copies_flash() {
        let mut e = authorized();
        let mut buf = [0u8; 4];
        e.read(0x0800_3210, &mut buf).unwrap();
        assert_eq!(buf, [0x10, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn write_assembles_little_endian_words() {
        let mut e = authorized();
        e.write(0x0800_3200, &[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(
            e.flash().written,
            vec![(0x0800_3200, vec![0x0403_0201, 0x0807_0605])]
        );
    }

    #[test]
    fn marker_addresses() {
        let mut e = authorized();

        e.write(CLEAR_MARKER_ADDRESS, &[0; 4]).unwrap();
        assert_eq!(e.flash().erased, vec![0x0802_FF80]);
        assert!(e.flash().written.is_empty());

        e.write(SET_MARKER_ADDRESS, &VALID_APPLICATION.to_le_bytes()).unwrap();
        assert_eq!(e.flash().written, vec![(0x0802_FFEC, vec![VALID_APPLICATION])]);
    }

    #[test]
    fn flash_failures_surface() {
        let mut e = authorized();
        e.flash().fail = Some(FlashError::ReadbackMismatch);
        assert_eq!(
            e.write(0x0800_3200, &[0; 4]),
            Err(CommandError::Flash(FlashError::ReadbackMismatch))
        );
        assert_eq!(
            e.erase(ERASE_MODE_GLOBAL, 0),
            Err(CommandError::Flash(FlashError::ReadbackMismatch))
        );
    }

    #[test]
    fn only_global_erase_runs() {
        let mut e = authorized();
        e.erase(ERASE_MODE_GLOBAL, 0).unwrap();
        assert_eq!(e.flash().erased, vec![0x0800_3200]);

        for mode in [ERASE_MODE_BANK1, ERASE_MODE_BANK2, 0x0003].iter() {
            assert_eq!(e.erase(*mode, 4), Err(CommandError::UnsupportedEraseMode(*mode)));
        }
        assert_eq!(e.flash().erased.len(), 1);
    }

    #[test]
    fn go_requires_valid_marker() {
        let mut e = executor();
        assert_eq!(e.go(), Err(CommandError::InvalidApplication));
        assert!(e.handoff().events.is_empty());
        assert_eq!(e.boot_tag().read(), ENTERED_FROM_APPLICATION);

        e.flash().marker = VALID_APPLICATION;
        assert_eq!(e.go(), Ok(()));
        assert_eq!(e.handoff().events, vec!["quiesce", "jump"]);
        assert_eq!(e.boot_tag().read(), 0);
    }

    #[test]
    fn failed_authorization_reports() {
        let mut e = executor();
        let challenge = e.randomize(5);
        let mut response = answer(&challenge);
        response[7] ^= 0x80;
        assert_eq!(e.authorize(&response), Err(CommandError::AuthenticationFailed));
        assert!(!e.is_authorized());
    }
}
