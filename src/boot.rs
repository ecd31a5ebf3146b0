//! Cold-start routing between the application and the resident bootloader.

use crate::executor::Executor;
use crate::platform::{Flash, Handoff, Marker};
use crate::protocol::ENTERED_FROM_APPLICATION;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum BootDecision {
    /// Hand control to the installed application
    Launch,
    /// The application asked for the bootloader via the BootTag
    Requested,
    /// No valid application is installed
    NoApplication,
}

/// Decide what to do after reset from the BootTag and the validity marker
pub fn decide(boot_tag: u32, application_valid: bool) -> BootDecision {
    if boot_tag == ENTERED_FROM_APPLICATION {
        BootDecision::Requested
    } else if !application_valid {
        BootDecision::NoApplication
    } else {
        BootDecision::Launch
    }
}

impl<F, H, T> Executor<F, H, T>
where
    F: Flash,
    H: Handoff,
    T: Marker,
{
    /// Inspect and clear the BootTag, launching the application when appropriate.
    ///
    /// On hardware this only returns when the bootloader should stay resident.
    pub fn boot(&mut self) -> BootDecision {
        let tag = self.boot_tag().read();
        let decision = decide(tag, self.application_valid());
        self.boot_tag().clear();

        debug!("Boot tag 0x{:08x}, decision {:?}", tag, decision);

        if decision == BootDecision::Launch {
            self.launch();
        }
        decision
    }
}
