//! Chunking error types.

use thiserror::Error;

/// Chunk framing and reassembly errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Payload needs more frames or bytes than the header can describe
    #[error("payload of {len} bytes exceeds the {max}-byte transfer limit")]
    TooLarge {
        /// Payload length
        len: usize,
        /// Maximum payload for the configured MTU
        max: usize,
    },

    /// MTU too small to carry framing plus data
    #[error("mtu {0} is below the minimum of {min}", min = crate::MIN_MTU)]
    MtuTooSmall(usize),

    /// Empty write received
    #[error("empty frame")]
    EmptyFrame,

    /// First byte is neither a header nor a data marker
    #[error("unknown frame marker: 0x{0:02X}")]
    UnknownMarker(u8),

    /// Header frame could not be decoded
    #[error("malformed chunk header: {0}")]
    MalformedHeader(&'static str),

    /// Data frame arrived with no transfer in progress
    #[error("data frame without a preceding header")]
    UnexpectedData,

    /// More data frames than the header announced
    #[error("transfer {message_id} overflowed its {total_chunks} announced chunks")]
    TooManyChunks {
        /// Transfer id from the header
        message_id: u8,
        /// Frame count announced by the header
        total_chunks: u8,
    },
}
