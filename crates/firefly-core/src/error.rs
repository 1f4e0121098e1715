//! Error types for the protocol engine
//!
//! Errors are categorized to support drop/retry decisions.
//!
//! # Error Categories
//!
//! - **Terminal drops**: decode, replay and timestamp failures. Logged, never retried.
//! - **Security relevant**: authentication failures, kept distinct for auditing
//! - **Transient**: transport writes and ACK timeouts, retried and then counted
//!   toward the circuit breaker
//! - **Skips**: an open circuit, which is a no-op rather than a failure

use std::borrow::Cow;

use firefly_chunk::ChunkError;
use firefly_crypto::CryptoError;
use firefly_transport::TransportError;
use thiserror::Error;

/// Packet encoding and decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Empty input
    #[error("empty packet")]
    Empty,

    /// First byte is not the packet payload tag
    #[error("unexpected payload tag 0x{0:02X}")]
    WrongTag(u8),

    /// JSON body could not be parsed
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// A field parsed but holds an impossible value
    #[error("invalid packet field: {0}")]
    InvalidField(&'static str),

    /// Serialization failed
    #[error("packet encoding failed: {0}")]
    Encode(String),

    /// Sealing or opening failed
    #[error("packet crypto failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// Reasons an inbound packet is rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Bytes did not decode to a packet
    #[error("decode error: {0}")]
    Decode(#[from] PacketError),

    /// Packet id seen within the retention window
    #[error("replayed packet {0}")]
    Replay(String),

    /// Packet older than the accepted age
    #[error("stale packet: {age_secs}s old")]
    StaleTimestamp {
        /// Packet age in seconds
        age_secs: u64,
    },

    /// Packet dated too far in the future
    #[error("packet timestamp {skew_secs}s in the future")]
    FutureTimestamp {
        /// Seconds ahead of the local clock
        skew_secs: u64,
    },

    /// Signature missing or not valid for the sender's key
    #[error("authentication failed for sender {sender}")]
    Authentication {
        /// Claimed sender
        sender: String,
    },

    /// No key registered for a sender that must be verified
    #[error("unknown sender {0}")]
    UnknownSender(String),
}

impl ValidationError {
    /// True for failures that should raise a security alert
    #[must_use]
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            ValidationError::Authentication { .. } | ValidationError::UnknownSender(_)
        )
    }

    /// Short machine-readable reason for drop events
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::Decode(_) => "decode",
            ValidationError::Replay(_) => "replay",
            ValidationError::StaleTimestamp { .. } => "stale",
            ValidationError::FutureTimestamp { .. } => "future",
            ValidationError::Authentication { .. } => "authentication",
            ValidationError::UnknownSender(_) => "unknown-sender",
        }
    }
}

/// Media delivery errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A chunk write failed
    #[error("transport write failed: {0}")]
    TransportWrite(#[from] TransportError),

    /// No ACK within the timeout
    #[error("ACK timeout for vote {0}")]
    AckTimeout(String),

    /// Breaker is open; the pass was skipped
    #[error("circuit open, sync skipped")]
    CircuitOpen,

    /// Vote store failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Media item cannot be framed
    #[error("media payload rejected: {0}")]
    Payload(#[from] ChunkError),
}

impl SyncError {
    /// True if this failure counts toward the circuit breaker
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            SyncError::TransportWrite(_) | SyncError::AckTimeout(_) | SyncError::Storage(_)
        )
    }

    /// True if retrying the same item may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransportWrite(_) | SyncError::AckTimeout(_))
    }
}

/// Umbrella error for engine operations
#[derive(Debug, Error, Clone)]
pub enum FireflyError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Chunking failed
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Packet codec failed
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Inbound packet rejected
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Media delivery failed
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Channel send/receive error
    #[error("Channel error: {0}")]
    Channel(Cow<'static, str>),
}

impl FireflyError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            FireflyError::Transport(_) | FireflyError::Channel(_) => true,
            FireflyError::Sync(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FireflyError::InvalidConfig(_)
                | FireflyError::Crypto(_)
                | FireflyError::Chunk(_)
                | FireflyError::Packet(_)
                | FireflyError::Validation(_)
                | FireflyError::InvalidState(_)
        )
    }

    /// Create a configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        FireflyError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        FireflyError::InvalidState(Cow::Borrowed(context))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FireflyError>;
