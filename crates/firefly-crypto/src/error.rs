//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A caller-supplied argument has the wrong shape (salt, key material)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Authentication tag did not verify.
    ///
    /// Raised for tampered or corrupted ciphertext. Callers treat this as a
    /// security event, never as ordinary corruption.
    #[error("authentication failed: ciphertext or tag was tampered with")]
    AuthenticationFailed,

    /// Encrypted blob shorter than nonce + tag
    #[error("encrypted blob too short: {0} bytes")]
    BlobTooShort(usize),

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,
}
