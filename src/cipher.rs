//! Toy modular-exponentiation cipher used to obfuscate the authorization
//! challenge.
//!
//! This is textbook RSA over 16-bit moduli applied one byte at a time. It
//! offers no real secrecy: both exponents needed to answer a challenge are
//! small and the device carries the exponent that decrypts host responses.
//! The arithmetic (signed remainder, the byte offset, little-endian 16-bit
//! cipher words) must stay bit-exact for compatibility with existing hosts.

/// Offset applied to each byte before and after exponentiation
pub const SEED_OFFSET: i32 = 96;

/// A modulus / exponent pair
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct KeyPair {
    pub modulus: i16,
    pub exponent: i16,
}

/// Device public key, used to encrypt issued challenges
pub const DEVICE_KEY: KeyPair = KeyPair { modulus: 2651, exponent: 7 };

/// Host key pair held by the device, used to decrypt host responses
pub const HOST_RESPONSE_KEY: KeyPair = KeyPair { modulus: 1243, exponent: 1867 };

/// Host-side counterparts of [`DEVICE_KEY`] and [`HOST_RESPONSE_KEY`]
pub mod host {
    use super::KeyPair;

    /// Decrypts challenges issued by the device
    pub const CHALLENGE_KEY: KeyPair = KeyPair { modulus: 2651, exponent: 2743 };

    /// Encrypts responses for the device
    pub const RESPONSE_KEY: KeyPair = KeyPair { modulus: 1243, exponent: 3 };
}

// Remainders follow the sign of the dividend, as the deployed hosts expect.
fn modpow(base: i32, key: KeyPair) -> i32 {
    let n = key.modulus as i32;
    let mut k = 1i32;
    for _ in 0..key.exponent {
        k = (k * base) % n;
    }
    k
}

/// Encrypt `plain` byte-wise, each byte becoming one little-endian 16-bit word
pub fn encrypt(plain: &[u8], cipher: &mut [u8], key: KeyPair) {
    for (p, c) in plain.iter().zip(cipher.chunks_exact_mut(2)) {
        let ct = modpow(*p as i32 - SEED_OFFSET, key) + SEED_OFFSET;
        c.copy_from_slice(&(ct as i16).to_le_bytes());
    }
}

/// Decrypt little-endian 16-bit words back into bytes
pub fn decrypt(cipher: &[u8], plain: &mut [u8], key: KeyPair) {
    for (c, p) in cipher.chunks_exact(2).zip(plain.iter_mut()) {
        let ct = i16::from_le_bytes([c[0], c[1]]) as i32 - SEED_OFFSET;
        *p = (modpow(ct, key) + SEED_OFFSET) as u8;
    }
}

/// Linear congruential generator matching the newlib `rand()` sequence
#[derive(Clone, Debug)]
pub struct Lcg(u64);

impl Lcg {
    pub const MULTIPLIER: u64 = 6364136223846793005;

    /// Seed the generator, as `srand(seed)` does
    pub fn new(seed: u16) -> Self {
        Self(seed as u64)
    }

    /// Draw the next 31-bit value
    pub fn next_u31(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(Self::MULTIPLIER).wrapping_add(1);
        ((self.0 >> 32) & 0x7FFF_FFFF) as u32
    }
}
