//! Protocol state machine.

use core::convert::TryFrom;

use embedded_hal::serial::Write;

use crate::boot::BootDecision;
use crate::executor::Executor;
use crate::layout::Layout;
use crate::mailbox::RxMailbox;
use crate::platform::{Flash, Handoff, Marker};
use crate::protocol::{self, *};
use crate::receive::{CrcFlags, Received, Receiver};
use crate::{Error, Options, ProtocolError};

/// Protocol states, each naming the field being received
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    WaitForCommand,
    WriteReceiveAddress,
    WriteReceiveLength,
    WriteReceiveData,
    ReadReceiveAddress,
    ReadReceiveLength,
    EraseReceiveMode,
    EraseReceivePages,
    EraseReceiveCrc,
    GoReceiveAddress,
    RandomizeReceiveResponse,
}

impl State {
    /// Whether a CRC failure while receiving this field is answered with NACK.
    ///
    /// Length, trailing data and erase fields stay silent since the host may
    /// still be clocking out bytes of a frame whose length was misread.
    fn nacks_invalid(&self) -> bool {
        !matches!(
            self,
            State::WriteReceiveLength
                | State::WriteReceiveData
                | State::ReadReceiveLength
                | State::EraseReceiveMode
                | State::EraseReceivePages
                | State::EraseReceiveCrc
        )
    }
}

pub struct Bootloader<'a, S, F, H, T> {
    link: &'a RxMailbox,
    serial: S,
    executor: Executor<F, H, T>,
    options: Options,
    state: State,
    receiver: Receiver,
    /// Discarding input until the line goes quiet
    draining: bool,

    address: u32,
    length: usize,
    erase_mode: u16,
    erase_pages: u16,
    reply: [u8; FRAME_CAPACITY],
}

impl<'a, S, F, H, T, E> Bootloader<'a, S, F, H, T>
where
    S: Write<u8, Error = E>,
    F: Flash,
    H: Handoff,
    T: Marker,
    E: core::fmt::Debug,
{
    /// Create a new bootloader session.
    ///
    /// `link` is the mailbox fed by the serial receive and timer interrupts,
    /// it is reconfigured with the timeouts from `options`.
    pub fn new(
        link: &'a RxMailbox,
        serial: S,
        flash: F,
        handoff: H,
        boot_tag: T,
        layout: Layout,
        options: Options,
    ) -> Self {
        link.configure(&options);

        Self {
            link,
            serial,
            executor: Executor::new(flash, handoff, boot_tag, layout),
            options,
            state: State::WaitForCommand,
            receiver: Receiver::new(),
            draining: false,
            address: 0,
            length: 0,
            erase_mode: 0,
            erase_pages: 0,
            reply: [0u8; FRAME_CAPACITY],
        }
    }

    /// Run the cold-start decision, on hardware this only returns to stay resident
    pub fn start(&mut self) -> BootDecision {
        self.executor.boot()
    }

    /// Fetch the protocol state
    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.executor.is_authorized()
    }

    pub fn executor(&mut self) -> &mut Executor<F, H, T> {
        &mut self.executor
    }

    pub fn serial(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Advance the session, call as often as possible from the main loop.
    ///
    /// Only blocks while replies are transmitted.
    pub fn poll(&mut self) -> Result<(), Error<E>> {
        if self.link.take_overrun() {
            warn!("Receive buffer overrun");
        }

        if self.draining {
            self.drain();
        } else {
            let state = self.state;
            let (len, flags) = self.field(state);

            match self.receiver.receive(self.link, len, flags) {
                Received::Nothing => (),
                Received::Valid => self.handle(state)?,
                Received::Invalid => self.protocol_error(state, ProtocolError::InvalidCrc)?,
                Received::Timeout => self.protocol_error(state, ProtocolError::Timeout)?,
            }
        }

        if self.link.idle_expired() {
            info!("No traffic for {} ms, starting application", self.options.idle_timeout_ms);
            self.link.restart_idle_timer();
            if let Err(e) = self.executor.go() {
                warn!("Idle exit failed: {:?}", e);
            }
        }

        Ok(())
    }

    /// Length and CRC handling of the field expected in `state`
    fn field(&self, state: State) -> (usize, CrcFlags) {
        match state {
            State::WaitForCommand => (COMMAND_LEN + CRC_LEN, CrcFlags::all()),
            State::WriteReceiveAddress => (ADDRESS_LEN + CRC_LEN, CrcFlags::all()),
            State::WriteReceiveLength => (LENGTH_LEN, CrcFlags::RESET),
            State::WriteReceiveData => (self.length + CRC_LEN, CrcFlags::CHECK),
            State::ReadReceiveAddress => (ADDRESS_LEN + CRC_LEN, CrcFlags::all()),
            State::ReadReceiveLength => (LENGTH_LEN + CRC_LEN, CrcFlags::all()),
            State::EraseReceiveMode => (ERASE_MODE_LEN, CrcFlags::RESET),
            State::EraseReceivePages => (ERASE_PAGES_LEN, CrcFlags::empty()),
            State::EraseReceiveCrc => (CRC_LEN, CrcFlags::CHECK),
            State::GoReceiveAddress => (ADDRESS_LEN + CRC_LEN, CrcFlags::all()),
            State::RandomizeReceiveResponse => (CHALLENGE_LEN + CRC_LEN, CrcFlags::all()),
        }
    }

    fn handle(&mut self, state: State) -> Result<(), Error<E>> {
        match state {
            State::WaitForCommand => {
                let [code] = self.receiver.head::<1>();
                self.dispatch(code)?;
            }

            State::WriteReceiveAddress => {
                self.address = protocol::address(&self.receiver.head());
                self.goto(State::WriteReceiveLength);
                self.confirm(true)?;
            }
            State::WriteReceiveLength => {
                self.length = self.receiver.head::<1>()[0] as usize + 1;
                self.goto(State::WriteReceiveData);
            }
            State::WriteReceiveData => {
                let data = &self.receiver.frame()[..self.length];
                let ok = self.executor.write(self.address, data).is_ok();
                self.goto(State::WaitForCommand);
                self.confirm(ok)?;
            }

            State::ReadReceiveAddress => {
                self.address = protocol::address(&self.receiver.head());
                self.goto(State::ReadReceiveLength);
                self.confirm(true)?;
            }
            State::ReadReceiveLength => {
                self.length = self.receiver.head::<1>()[0] as usize + 1;
                let ok = self
                    .executor
                    .read(self.address, &mut self.reply[..self.length])
                    .is_ok();
                self.goto(State::WaitForCommand);
                self.confirm(ok)?;
                if ok {
                    self.send_reply(self.length)?;
                }
            }

            State::EraseReceiveMode => {
                self.erase_mode = protocol::half_word(&self.receiver.head());
                if self.erase_mode < ERASE_MODE_SPECIAL {
                    self.goto(State::EraseReceivePages);
                } else {
                    self.erase_pages = 0;
                    self.goto(State::EraseReceiveCrc);
                }
            }
            State::EraseReceivePages => {
                self.erase_pages = protocol::half_word(&self.receiver.head());
                self.goto(State::EraseReceiveCrc);
            }
            State::EraseReceiveCrc => {
                let ok = self.executor.erase(self.erase_mode, self.erase_pages).is_ok();
                self.goto(State::WaitForCommand);
                self.confirm(ok)?;
            }

            State::GoReceiveAddress => {
                self.address = protocol::address(&self.receiver.head());
                debug!("GO requested for 0x{:08x}", self.address);

                let valid = self.executor.application_valid();
                self.goto(State::WaitForCommand);
                self.confirm(valid)?;
                if valid {
                    if let Err(e) = self.executor.go() {
                        warn!("GO failed: {:?}", e);
                    }
                }
            }

            State::RandomizeReceiveResponse => {
                let response = self.receiver.head::<CHALLENGE_LEN>();
                let ok = self.executor.authorize(&response).is_ok();
                self.goto(State::WaitForCommand);
                self.confirm(ok)?;
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, code: u8) -> Result<(), Error<E>> {
        let command = match Command::try_from(code) {
            Ok(c) => c,
            Err(c) => {
                debug!("Unknown command 0x{:02x}", c);
                return self.confirm(false);
            }
        };

        debug!("Command {:?}", command);

        match command {
            Command::Get => {
                self.confirm(true)?;
                let report = self.executor.get();
                self.reply[..report.len()].copy_from_slice(&report);
                self.send_reply(report.len())?;
            }
            Command::GetId => {
                self.confirm(true)?;
                let id = self.executor.get_id();
                self.reply[..id.len()].copy_from_slice(&id);
                self.send_reply(id.len())?;
            }
            Command::WriteMemory => {
                self.goto(State::WriteReceiveAddress);
                self.confirm(true)?;
            }
            Command::ReadMemory => {
                self.goto(State::ReadReceiveAddress);
                self.confirm(true)?;
            }
            Command::ExtendedErase => {
                self.goto(State::EraseReceiveMode);
                self.confirm(true)?;
            }
            Command::Go => {
                self.goto(State::GoReceiveAddress);
                self.confirm(true)?;
            }
            Command::Randomize => {
                let challenge = self.executor.randomize(self.link.seed() as u16);
                self.reply[..CHALLENGE_LEN].copy_from_slice(&challenge);
                self.goto(State::RandomizeReceiveResponse);
                self.confirm(true)?;
                self.send_reply(CHALLENGE_LEN)?;
            }
            Command::WriteUnprotect | Command::ReadoutUnprotect => {
                debug!("Command {:?} is advertised only", command);
                self.confirm(false)?;
            }
        }

        Ok(())
    }

    fn protocol_error(&mut self, state: State, error: ProtocolError) -> Result<(), Error<E>> {
        match (state, error) {
            (State::WaitForCommand, ProtocolError::Timeout) => (),
            _ => warn!("{:?} in state {:?}", error, state),
        }

        self.receiver.reset();
        self.goto(State::WaitForCommand);

        if error != ProtocolError::InvalidCrc {
            return Ok(());
        }

        // Whatever follows a corrupt field belongs to the aborted command
        self.link.flush();

        if state.nacks_invalid() {
            self.confirm(false)?;
        } else {
            // The host gets no NACK and may still be sending, wait for the line to go quiet
            self.link.restart_frame_timer();
            self.draining = true;
        }

        Ok(())
    }

    /// Drop received bytes until a frame timeout passes without traffic
    fn drain(&mut self) {
        self.link.flush();
        if self.link.frame_expired() {
            debug!("Line quiet, accepting commands");
            self.draining = false;
        }
    }

    fn goto(&mut self, next: State) {
        if next != self.state {
            debug!("State {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn confirm(&mut self, ack: bool) -> Result<(), Error<E>> {
        let c = if ack { UART_ACK } else { UART_NACK };
        transmit(&mut self.serial, self.options.tx_spin_limit, &[c])
    }

    fn send_reply(&mut self, len: usize) -> Result<(), Error<E>> {
        transmit(&mut self.serial, self.options.tx_spin_limit, &self.reply[..len])
    }
}

/// Blocking send, each byte and the final flush get at most `spin_limit` polls
fn transmit<S, E>(serial: &mut S, spin_limit: u32, data: &[u8]) -> Result<(), Error<E>>
where
    S: Write<u8, Error = E>,
{
    trace!("Send {:02x?}", data);

    for b in data {
        bounded(spin_limit, || serial.write(*b))?;
    }
    bounded(spin_limit, || serial.flush())
}

fn bounded<T, E>(
    spin_limit: u32,
    mut f: impl FnMut() -> nb::Result<T, E>,
) -> Result<T, Error<E>> {
    for _ in 0..spin_limit {
        match f() {
            Ok(v) => return Ok(v),
            Err(nb::Error::WouldBlock) => (),
            Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
        }
    }

    error!("Transmit timeout");
    Err(Error::TxTimeout)
}

#[cfg(test)]
mod test {
    use super::*;

    struct StuckSerial {
        attempts: u32,
    }

    impl Write<u8> for StuckSerial {
        type Error = ();

        fn write(&mut self, _word: u8) -> nb::Result<(), ()> {
            self.attempts += 1;
            Err(nb::Error::WouldBlock)
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    struct SlowSerial {
        busy: u32,
        sent: Vec<u8>,
    }

    impl Write<u8> for SlowSerial {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            if self.busy > 0 {
                self.busy -= 1;
                return Err(nb::Error::WouldBlock);
            }
            self.busy = 3;
            self.sent.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    #[test]
    fn transmit_waits_for_completion() {
        let mut s = SlowSerial { busy: 2, sent: vec![] };
        transmit(&mut s, 10, &[UART_ACK, 0x01]).unwrap();
        assert_eq!(s.sent, vec![UART_ACK, 0x01]);
    }

    #[test]
    fn transmit_wait_is_bounded() {
        let mut s = StuckSerial { attempts: 0 };
        assert_eq!(transmit(&mut s, 50, &[UART_ACK]), Err(Error::TxTimeout));
        assert_eq!(s.attempts, 50);
    }

    #[test]
    fn silent_states() {
        assert!(State::WaitForCommand.nacks_invalid());
        assert!(State::WriteReceiveAddress.nacks_invalid());
        assert!(State::GoReceiveAddress.nacks_invalid());
        assert!(State::RandomizeReceiveResponse.nacks_invalid());
        assert!(!State::ReadReceiveLength.nacks_invalid());
        assert!(!State::EraseReceiveCrc.nacks_invalid());
    }
}
