//! Ed25519 packet signatures.
//!
//! Authors sign every packet they create; relays never re-sign. The
//! coordinator verifies against the author's registered public key before
//! touching the ciphertext.
//!
//! - 64-byte signatures
//! - 32-byte public keys
//! - 32-byte private keys (zeroized on drop)
//! - Deterministic signature generation
//!
//! ## Usage
//!
//! ```rust
//! use firefly_crypto::signatures::{SigningKey, verify};
//! use rand_core::OsRng;
//!
//! let signing_key = SigningKey::generate(&mut OsRng);
//! let public = signing_key.verifying_key().to_bytes();
//!
//! let signature = signing_key.sign(b"block");
//! assert!(verify(b"block", signature.as_bytes(), &public));
//! ```

use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

use crate::{CryptoError, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Get the raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    fn to_dalek(self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.0)
    }
}

/// Ed25519 signing key (private key)
///
/// Zeroized on drop to prevent key material from lingering in memory.
#[derive(ZeroizeOnDrop)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a new random signing key
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Create from raw 32-byte seed
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.inner.sign(message);
        Signature(sig.to_bytes())
    }

    /// Get the corresponding verifying key (public key)
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Export signing key bytes (use with extreme caution)
    ///
    /// # Security
    ///
    /// This exposes the raw secret key bytes. Handle with extreme care
    /// and ensure proper zeroization after use.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }
}

/// Ed25519 verifying key (public key)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

impl VerifyingKey {
    /// Create from raw 32-byte public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes do not
    /// represent a valid Ed25519 public key point.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Parse a hex-encoded public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] for bad hex, wrong length or
    /// an invalid curve point.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidPublicKey)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = raw.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw public key bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Hex encoding of the public key
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature on a message
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature is invalid,
    /// malformed, or does not authenticate the message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Verify `signature` over `data` with a raw public key.
///
/// Pure predicate: any malformed input yields `false`.
#[must_use]
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(public_key) = <[u8; PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let message = b"authenticate this message";
        let signature = signing_key.sign(message);

        assert!(verifying_key.verify(message, &signature).is_ok());
        assert!(verify(message, signature.as_bytes(), &verifying_key.to_bytes()));
    }

    #[test]
    fn test_wrong_message_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();

        let signature = signing_key.sign(b"original message");

        assert!(!verify(b"tampered message", signature.as_bytes(), &public));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signing_key1 = SigningKey::generate(&mut OsRng);
        let signing_key2 = SigningKey::generate(&mut OsRng);

        let signature = signing_key1.sign(b"test");

        // Wrong verifying key should fail
        assert!(!verify(
            b"test",
            signature.as_bytes(),
            &signing_key2.verifying_key().to_bytes()
        ));
    }

    #[test]
    fn test_single_bit_flip_in_signature_fails() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let signature = signing_key.sign(b"block");

        for byte in [0usize, 31, 32, 63] {
            for bit in 0..8 {
                let mut tampered = *signature.as_bytes();
                tampered[byte] ^= 1 << bit;
                assert!(!verify(b"block", &tampered, &public));
            }
        }
    }

    #[test]
    fn test_malformed_inputs_are_false() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let signature = signing_key.sign(b"x");

        assert!(!verify(b"x", &signature.as_bytes()[..63], &public));
        assert!(!verify(b"x", signature.as_bytes(), &public[..31]));
        assert!(!verify(b"x", &[0u8; 64], &public));
    }

    #[test]
    fn test_signature_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let message = b"deterministic test";

        assert_eq!(signing_key.sign(message), signing_key.sign(message));
    }

    #[test]
    fn test_signature_from_slice_wrong_size() {
        assert!(Signature::from_slice(&[0u8; 32]).is_err());
        assert!(Signature::from_slice(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_verifying_key_hex_roundtrip() {
        let verifying_key = SigningKey::generate(&mut OsRng).verifying_key();
        let recovered = VerifyingKey::from_hex(&verifying_key.to_hex()).unwrap();
        assert_eq!(verifying_key, recovered);

        assert!(VerifyingKey::from_hex("zz").is_err());
        assert!(VerifyingKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_signing_key_from_bytes_roundtrip() {
        let original = SigningKey::generate(&mut OsRng);
        let recovered = SigningKey::from_bytes(&original.to_bytes());

        let message = b"test message";
        assert_eq!(original.sign(message), recovered.sign(message));
    }
}
