//! # Firefly Crypto
//!
//! Cryptographic primitives for the Firefly relay protocol.
//!
//! This crate provides:
//! - PBKDF2 key derivation from an event passphrase
//! - `AES-256-GCM` encryption with self-contained `nonce || ct || tag` blobs
//! - Ed25519 signatures over packet blocks
//! - Random packet identifiers and salts
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | KDF | PBKDF2-HMAC-SHA256, 100k iterations | password-bound |
//! | AEAD | AES-256-GCM | 256-bit key |
//! | Signatures | Ed25519 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod random;
pub mod signatures;

pub use aead::{AeadKey, Nonce};
pub use error::CryptoError;
pub use kdf::{KdfParams, derive_key};
pub use signatures::{Signature, SigningKey, VerifyingKey, verify};

/// AES-256-GCM key size
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// PBKDF2 salt size
pub const SALT_SIZE: usize = 16;

/// Ed25519 public key size
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const SIGNATURE_SIZE: usize = 64;
