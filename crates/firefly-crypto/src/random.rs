//! Random identifiers.
//!
//! All randomness comes from the operating system CSPRNG.

use rand_core::{OsRng, RngCore};

/// Fill a buffer with random bytes from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generate a random 16-byte array.
#[must_use]
pub fn random_16() -> [u8; 16] {
    let mut buf = [0u8; 16];
    fill_random(&mut buf);
    buf
}

/// Generate a fresh opaque packet identifier (32 hex characters).
#[must_use]
pub fn packet_id() -> String {
    hex::encode(random_16())
}

/// Generate a random salt for key derivation.
#[must_use]
pub fn salt() -> [u8; crate::SALT_SIZE] {
    random_16()
}
