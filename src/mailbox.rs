//! Interrupt-facing receive mailbox.
//!
//! The serial receive-complete interrupt appends bytes with
//! [`RxMailbox::on_rx_byte`] and a ~1 ms timer interrupt calls
//! [`RxMailbox::tick`]. Everything else happens in the poll loop. Bytes move
//! through a single-producer single-consumer ring so neither side ever waits
//! on the other.
//!
//! Only plain atomic loads and stores are used so the mailbox works on
//! cores without compare-and-swap (Cortex-M0+). `on_rx_byte` and `tick` must
//! run at the same interrupt priority so they never preempt each other.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::protocol::FRAME_CAPACITY;
use crate::Options;

// Indices run over twice the capacity so a full ring differs from an empty one
const INDEX_WRAP: usize = 2 * FRAME_CAPACITY;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicU8 = AtomicU8::new(0);

pub struct RxMailbox {
    ring: [AtomicU8; FRAME_CAPACITY],
    /// Written only by `on_rx_byte`
    head: AtomicUsize,
    /// Written only by the poll loop
    tail: AtomicUsize,
    overrun: AtomicBool,

    frame_timeout: AtomicU32,
    idle_timeout: AtomicU32,
    seed: AtomicU32,

    frame_reload: AtomicU32,
    idle_reload: AtomicU32,
}

impl Default for RxMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl RxMailbox {
    /// Create an empty mailbox with the default timeouts, usable in a `static`
    pub const fn new() -> Self {
        Self {
            ring: [EMPTY; FRAME_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overrun: AtomicBool::new(false),
            frame_timeout: AtomicU32::new(Options::FRAME_TIMEOUT_MS),
            idle_timeout: AtomicU32::new(Options::IDLE_TIMEOUT_MS),
            seed: AtomicU32::new(0),
            frame_reload: AtomicU32::new(Options::FRAME_TIMEOUT_MS),
            idle_reload: AtomicU32::new(Options::IDLE_TIMEOUT_MS),
        }
    }

    /// Apply timeouts from `options` and restart both timers
    pub fn configure(&self, options: &Options) {
        self.frame_reload.store(options.frame_timeout_ms, Ordering::Relaxed);
        self.idle_reload.store(options.idle_timeout_ms, Ordering::Relaxed);
        self.restart_frame_timer();
        self.restart_idle_timer();
    }

    /// Receive-complete callback, call from the serial interrupt
    pub fn on_rx_byte(&self, byte: u8) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if (head + INDEX_WRAP - tail) % INDEX_WRAP < FRAME_CAPACITY {
            self.ring[head % FRAME_CAPACITY].store(byte, Ordering::Relaxed);
            self.head.store((head + 1) % INDEX_WRAP, Ordering::Release);
        } else {
            self.overrun.store(true, Ordering::Relaxed);
        }

        // Any traffic keeps the session alive
        self.restart_idle_timer();
        self.restart_frame_timer();
    }

    /// Periodic ~1 ms tick, callable from interrupt context
    pub fn tick(&self) {
        let frame = self.frame_timeout.load(Ordering::Relaxed);
        if frame > 0 {
            self.frame_timeout.store(frame - 1, Ordering::Relaxed);
        }

        let idle = self.idle_timeout.load(Ordering::Relaxed);
        if idle > 0 {
            self.idle_timeout.store(idle - 1, Ordering::Relaxed);
        }

        let seed = self.seed.load(Ordering::Relaxed);
        self.seed.store(seed.wrapping_add(1), Ordering::Relaxed);
    }

    /// Number of received bytes not yet consumed
    pub fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        (head + INDEX_WRAP - tail) % INDEX_WRAP
    }

    /// Move `out.len()` received bytes into `out`, returns false if fewer are available
    pub fn take(&self, out: &mut [u8]) -> bool {
        if self.available() < out.len() {
            return false;
        }

        let mut tail = self.tail.load(Ordering::Relaxed);
        for b in out.iter_mut() {
            *b = self.ring[tail % FRAME_CAPACITY].load(Ordering::Relaxed);
            tail = (tail + 1) % INDEX_WRAP;
        }
        self.tail.store(tail, Ordering::Release);

        true
    }

    /// Discard everything received so far
    pub fn flush(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }

    /// Report and clear a ring overflow
    pub fn take_overrun(&self) -> bool {
        let overrun = self.overrun.load(Ordering::Relaxed);
        if overrun {
            self.overrun.store(false, Ordering::Relaxed);
        }
        overrun
    }

    pub fn restart_frame_timer(&self) {
        let reload = self.frame_reload.load(Ordering::Relaxed);
        self.frame_timeout.store(reload, Ordering::Relaxed);
    }

    pub fn frame_expired(&self) -> bool {
        self.frame_timeout.load(Ordering::Relaxed) == 0
    }

    pub fn restart_idle_timer(&self) {
        let reload = self.idle_reload.load(Ordering::Relaxed);
        self.idle_timeout.store(reload, Ordering::Relaxed);
    }

    pub fn idle_expired(&self) -> bool {
        self.idle_timeout.load(Ordering::Relaxed) == 0
    }

    /// Free-running tick counter used to seed challenges
    pub fn seed(&self) -> u32 {
        self.seed.load(Ordering::Relaxed)
    }
}
