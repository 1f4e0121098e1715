//! Password-based key derivation.
//!
//! Event keys are shared out of band as a passphrase plus a 16-byte salt
//! (typically printed on the event QR card). Every node stretches them into
//! the same 32-byte AES key with PBKDF2-HMAC-SHA256.
//!
//! ```rust
//! use firefly_crypto::kdf::{KdfParams, derive_key};
//!
//! let salt = [7u8; 16];
//! let key = derive_key(b"judges-2026", &salt, KdfParams::low_cost()).unwrap();
//! assert_eq!(key.as_bytes().len(), 32);
//! ```

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::aead::AeadKey;
use crate::error::CryptoError;
use crate::{KEY_SIZE, SALT_SIZE};

/// Protocol iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Parameters for PBKDF2 key stretching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests.
    ///
    /// **Warning:** Only use for testing. Keys derived this way are not
    /// interoperable with nodes using the protocol iteration count.
    #[must_use]
    pub fn low_cost() -> Self {
        Self { iterations: 1_000 }
    }
}

/// Derive a 32-byte AEAD key from a password and a 16-byte salt.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidArgument`] if `salt` is not exactly
/// [`SALT_SIZE`] bytes or the iteration count is zero.
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<AeadKey, CryptoError> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidArgument(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    if params.iterations == 0 {
        return Err(CryptoError::InvalidArgument(
            "iterations must be at least 1".into(),
        ));
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password, salt, params.iterations, &mut key);
    Ok(AeadKey::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [0x11u8; 16];
        let k1 = derive_key(b"password", &salt, KdfParams::low_cost()).unwrap();
        let k2 = derive_key(b"password", &salt, KdfParams::low_cost()).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_different_salt_different_key() {
        let k1 = derive_key(b"password", &[1u8; 16], KdfParams::low_cost()).unwrap();
        let k2 = derive_key(b"password", &[2u8; 16], KdfParams::low_cost()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_wrong_salt_length_rejected() {
        for len in [0usize, 8, 15, 17, 32] {
            let salt = vec![0u8; len];
            let err = derive_key(b"password", &salt, KdfParams::low_cost()).unwrap_err();
            assert!(matches!(err, CryptoError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let params = KdfParams { iterations: 0 };
        assert!(derive_key(b"pw", &[0u8; 16], params).is_err());
    }

    #[test]
    fn test_rfc_style_vector() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1, 32)
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"password", b"salt", 1, &mut out);
        assert_eq!(
            hex::encode(out),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }

    #[test]
    fn test_derive_key_default_params_vector() {
        // PBKDF2-HMAC-SHA256 at 100,000 iterations, salt 00..0f
        let salt: Vec<u8> = (0u8..16).collect();
        let key = derive_key(b"correct horse battery staple", &salt, KdfParams::default()).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "49d49c25f597846209f0d92e7770ab64e1c75e94b4ce6c509265ee67175d2a1e"
        );
    }

    #[test]
    fn test_default_iterations() {
        assert_eq!(KdfParams::default().iterations, 100_000);
    }
}
