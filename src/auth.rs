//! Challenge-response host authorisation.
//!
//! The device issues a random challenge encrypted with [`DEVICE_KEY`], the
//! host decrypts it and answers with the same value encrypted for
//! [`HOST_RESPONSE_KEY`]. A matching answer unlocks READ, WRITE and ERASE
//! until the next restart; failed answers never revoke an earlier grant.

use crate::cipher::{decrypt, encrypt, Lcg, DEVICE_KEY, HOST_RESPONSE_KEY};
use crate::protocol::CHALLENGE_LEN;

#[derive(Clone, Debug, Default)]
pub struct Authenticator {
    authorized: bool,
    challenge: u32,
    received: u32,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a host has answered a challenge correctly since restart
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Value most recently recovered from a host response
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Draw a fresh challenge from `seed` and return it encrypted
    pub fn issue_challenge(&mut self, seed: u16) -> [u8; CHALLENGE_LEN] {
        let mut rng = Lcg::new(seed);
        let low = rng.next_u31();
        let high = rng.next_u31();
        self.challenge = low.wrapping_add(high << 16).wrapping_add(1);

        trace!("Issued challenge 0x{:08x} (seed {})", self.challenge, seed);

        let mut cipher = [0u8; CHALLENGE_LEN];
        encrypt(&self.challenge.to_le_bytes(), &mut cipher, DEVICE_KEY);
        cipher
    }

    /// Check an encrypted host response against the outstanding challenge
    pub fn verify_response(&mut self, cipher: &[u8; CHALLENGE_LEN]) -> bool {
        let mut plain = [0u8; 4];
        decrypt(cipher, &mut plain, HOST_RESPONSE_KEY);
        self.received = u32::from_le_bytes(plain);

        if self.received == self.challenge {
            info!("Host authorized");
            self.authorized = true;
            true
        } else {
            warn!("Host response 0x{:08x} does not match challenge", self.received);
            false
        }
    }
}
