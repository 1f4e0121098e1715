//! # Firefly Chunk
//!
//! Carries arbitrarily sized payloads across a transport whose single write
//! is bounded by a small MTU.
//!
//! This crate provides:
//! - The fixed 5-byte [`ChunkHeader`]
//! - [`Chunker`] splitting a payload into an ordered frame sequence
//! - [`Assembler`] rebuilding the payload from that sequence
//!
//! ## Frame Layout
//!
//! Every transport write is one frame. The first byte tells header frames
//! and data frames apart, so a short data slice can never be mistaken for a
//! header:
//!
//! ```text
//! Header frame: [0xF0][messageId][chunkIndex=0][totalChunks][payloadLength u16 BE]
//! Data frame:   [0xF1][raw payload slice (<= mtu - 1 bytes)]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod assembler;
pub mod chunker;
pub mod error;
pub mod header;

pub use assembler::{Assembler, AssemblerState};
pub use chunker::Chunker;
pub use error::ChunkError;
pub use header::ChunkHeader;

/// Default transport MTU (usable bytes per write)
pub const DEFAULT_MTU: usize = 180;

/// Smallest MTU that still fits a header frame with room for data
pub const MIN_MTU: usize = 8;

/// Encoded header size
pub const HEADER_SIZE: usize = 5;

/// Frame marker preceding a [`ChunkHeader`]
pub const FRAME_HEADER: u8 = 0xF0;

/// Frame marker preceding a data slice
pub const FRAME_DATA: u8 = 0xF1;

/// Bytes of framing added to every write
pub const FRAME_OVERHEAD: usize = 1;

/// Maximum number of frames in one transfer, header included (1-byte field)
pub const MAX_TOTAL_CHUNKS: usize = u8::MAX as usize;

/// Chunking configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Largest single transport write in bytes, framing included
    pub mtu: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { mtu: DEFAULT_MTU }
    }
}

impl ChunkConfig {
    /// Bytes of payload carried by one data frame
    #[must_use]
    pub fn data_per_chunk(&self) -> usize {
        self.mtu.saturating_sub(FRAME_OVERHEAD)
    }

    /// Largest payload a single transfer can carry
    #[must_use]
    pub fn max_payload(&self) -> usize {
        (self.data_per_chunk() * (MAX_TOTAL_CHUNKS - 1)).min(u16::MAX as usize)
    }
}
