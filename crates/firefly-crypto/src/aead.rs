//! `AES-256-GCM` authenticated encryption.
//!
//! Every call draws a fresh random 96-bit nonce, so a key can be shared by
//! all nodes of an event without any nonce coordination. The output is a
//! self-contained blob:
//!
//! ```text
//! +-------------+---------------------------+-------------+
//! | Nonce (12B) | Ciphertext (len(plain))   | Tag (16B)   |
//! +-------------+---------------------------+-------------+
//! ```
//!
//! ## Security Properties
//!
//! - Confidentiality: AES-256 in counter mode
//! - Integrity: GHASH tag with 128-bit security
//! - Tampering surfaces as [`CryptoError::AuthenticationFailed`], distinct
//!   from malformed input
//!
//! ## Usage
//!
//! ```rust
//! use firefly_crypto::aead::AeadKey;
//! use rand_core::OsRng;
//!
//! let key = AeadKey::generate(&mut OsRng);
//! let blob = key.encrypt(b"score=9").unwrap();
//! assert_eq!(key.decrypt(&blob).unwrap(), b"score=9");
//! ```

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit},
};
use rand_core::{CryptoRng, OsRng, RngCore};
use zeroize::ZeroizeOnDrop;

use crate::CryptoError;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// AES-GCM nonce (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a nonce from a slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; NONCE_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random nonce.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// AEAD encryption key (32 bytes).
///
/// Key is zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

impl AeadKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if slice length is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with extreme care - this exposes the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new((&self.0).into())
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// Returns `nonce || ciphertext || tag`, i.e. `plaintext.len() + 28` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::generate(&mut OsRng);
        self.encrypt_with_nonce(&nonce, plaintext)
    }

    /// Encrypt with a caller-chosen nonce.
    ///
    /// Only for deterministic test vectors; reusing a nonce under the same
    /// key destroys both confidentiality and integrity.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn encrypt_with_nonce(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sealed = self
            .cipher()
            .encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(nonce.as_bytes());
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Decrypt a `nonce || ciphertext || tag` blob.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::BlobTooShort` if the blob cannot hold a nonce
    /// and tag, and `CryptoError::AuthenticationFailed` if the tag does not
    /// verify.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (nonce, sealed) = split_blob(blob)?;
        self.decrypt_parts(&nonce, sealed)
    }

    /// Decrypt when nonce and `ciphertext || tag` travel in separate fields.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::AuthenticationFailed` if the tag does not verify.
    pub fn decrypt_parts(&self, nonce: &Nonce, ciphertext_and_tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::BlobTooShort(NONCE_SIZE + ciphertext_and_tag.len()));
        }

        self.cipher()
            .decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), ciphertext_and_tag)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Split an encrypted blob into its nonce and `ciphertext || tag` parts.
///
/// # Errors
///
/// Returns `CryptoError::BlobTooShort` if `blob` is shorter than nonce + tag.
pub fn split_blob(blob: &[u8]) -> Result<(Nonce, &[u8]), CryptoError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::BlobTooShort(blob.len()));
    }
    let (nonce, rest) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce).ok_or(CryptoError::BlobTooShort(blob.len()))?;
    Ok((nonce, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_roundtrip() {
        let key = AeadKey::generate(&mut OsRng);
        let plaintext = b"judge 7 scored project 12";

        let blob = key.encrypt(plaintext).unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = key.decrypt(&blob).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = AeadKey::generate(&mut OsRng);
        let blob = key.encrypt(b"").unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + TAG_SIZE);
        assert!(key.decrypt(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = AeadKey::generate(&mut OsRng);
        let a = key.encrypt(b"same").unwrap();
        let b = key.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_is_authentication_failure() {
        let key = AeadKey::generate(&mut OsRng);
        let blob = key.encrypt(b"secret").unwrap();

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert_eq!(
                key.decrypt(&tampered).unwrap_err(),
                CryptoError::AuthenticationFailed,
                "byte {i} flip not detected"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = AeadKey::generate(&mut OsRng);
        let key2 = AeadKey::generate(&mut OsRng);

        let blob = key1.encrypt(b"secret").unwrap();
        assert_eq!(key2.decrypt(&blob).unwrap_err(), CryptoError::AuthenticationFailed);
    }

    #[test]
    fn test_short_blob_is_not_authentication_failure() {
        let key = AeadKey::generate(&mut OsRng);
        let err = key.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::BlobTooShort(27)));
    }

    #[test]
    fn test_decrypt_parts_matches_blob() {
        let key = AeadKey::generate(&mut OsRng);
        let blob = key.encrypt(b"split me").unwrap();
        let (nonce, sealed) = split_blob(&blob).unwrap();
        assert_eq!(key.decrypt_parts(&nonce, sealed).unwrap(), b"split me");
    }

    #[test]
    fn test_key_from_slice_wrong_size() {
        let err = AeadKey::from_slice(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let key = AeadKey::new([0x42u8; 32]);
        let nonce = Nonce::from_bytes([7u8; 12]);
        let a = key.encrypt_with_nonce(&nonce, b"vector").unwrap();
        let b = key.encrypt_with_nonce(&nonce, b"vector").unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..NONCE_SIZE], &[7u8; 12]);
    }

    #[test]
    fn test_nonce_from_slice() {
        let bytes = [0x42u8; NONCE_SIZE];
        let nonce = Nonce::from_slice(&bytes).unwrap();
        assert_eq!(nonce.as_bytes(), &bytes);

        // Wrong size should fail
        assert!(Nonce::from_slice(&[0u8; 11]).is_none());
    }
}
