//! Transport trait abstraction for radio backends.
//!
//! This module defines the `BleTransport` trait that abstracts over the
//! platform GATT stack. The protocol engine only ever sees connection state,
//! signal strength, raw writes and inbound notifications.

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No link to write over
    #[error("Transport is not connected")]
    NotConnected,

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Frame exceeds the per-write MTU
    #[error("Frame of {len} bytes exceeds MTU of {mtu}")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Transport MTU
        mtu: usize,
    },

    /// The radio rejected the write
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Capability not available on this device
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// One inbound write delivered by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Identifier of the peer that wrote the frame
    pub peer: String,
    /// Raw frame bytes
    pub data: Vec<u8>,
}

/// Async transport trait for the short-range radio link.
///
/// Implementations wrap a GATT connection: frames written with
/// [`write_raw`](Self::write_raw) reach the linked peer's characteristic and
/// frames the peer writes back surface through
/// [`notifications`](Self::notifications).
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Whether a link is currently up.
    fn is_connected(&self) -> bool;

    /// Most recent RSSI in dBm, if any reading exists.
    fn last_signal_strength(&self) -> Option<i16>;

    /// Number of nearby nodes currently advertising as relays.
    fn neighbor_link_count(&self) -> usize;

    /// Largest single write in bytes.
    fn mtu(&self) -> usize {
        crate::BLE_MTU
    }

    /// Write one frame.
    ///
    /// # Errors
    /// Returns `TransportError` if the link is down, the frame exceeds the
    /// MTU or the radio rejects the write.
    async fn write_raw(&self, data: &[u8]) -> TransportResult<()>;

    /// Subscribe to inbound frames.
    fn notifications(&self) -> broadcast::Receiver<InboundFrame>;

    /// Observe connection state changes.
    fn connection_state(&self) -> watch::Receiver<bool>;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Frames written successfully
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Failed writes
    pub send_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.frames_sent += 1;
    }

    /// Record a received frame
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.frames_received += 1;
    }

    /// Record a failed write
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }
}
