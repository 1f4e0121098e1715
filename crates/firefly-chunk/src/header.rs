//! Fixed 5-byte chunk header.

use crate::HEADER_SIZE;
use crate::error::ChunkError;

/// Header announcing a chunked transfer.
///
/// ```text
/// +-----------+------------+-------------+----------------------+
/// | messageId | chunkIndex | totalChunks | payloadLength (u16)  |
/// |   (1B)    |  (1B) = 0  |    (1B)     |     big-endian       |
/// +-----------+------------+-------------+----------------------+
/// ```
///
/// `totalChunks` counts the header itself, so a transfer with `n` data
/// chunks announces `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Groups the frames of one logical transfer
    pub message_id: u8,
    /// Always 0 for a header
    pub chunk_index: u8,
    /// Frames in the transfer, header included
    pub total_chunks: u8,
    /// Length of the reassembled payload
    pub payload_length: u16,
}

impl ChunkHeader {
    /// Create a header; `total_chunks` includes the header frame.
    #[must_use]
    pub fn new(message_id: u8, total_chunks: u8, payload_length: u16) -> Self {
        Self {
            message_id,
            chunk_index: 0,
            total_chunks,
            payload_length,
        }
    }

    /// Number of data frames that follow the header
    #[must_use]
    pub fn data_chunks(&self) -> usize {
        usize::from(self.total_chunks.saturating_sub(1))
    }

    /// Encode to the 5-byte wire form
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.payload_length.to_be_bytes();
        [
            self.message_id,
            self.chunk_index,
            self.total_chunks,
            len[0],
            len[1],
        ]
    }

    /// Decode and validate a 5-byte header.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::MalformedHeader`] if the length is wrong, the
    /// index is not 0 or the chunk count is 0.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChunkError> {
        let bytes: [u8; HEADER_SIZE] = bytes
            .try_into()
            .map_err(|_| ChunkError::MalformedHeader("header must be exactly 5 bytes"))?;

        let header = Self {
            message_id: bytes[0],
            chunk_index: bytes[1],
            total_chunks: bytes[2],
            payload_length: u16::from_be_bytes([bytes[3], bytes[4]]),
        };

        if header.chunk_index != 0 {
            return Err(ChunkError::MalformedHeader("header chunk index must be 0"));
        }
        if header.total_chunks == 0 {
            return Err(ChunkError::MalformedHeader("total chunks must be positive"));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = ChunkHeader::new(7, 3, 0x0102);
        assert_eq!(header.encode(), [7, 0, 3, 0x01, 0x02]);
        assert_eq!(header.data_chunks(), 2);
    }

    #[test]
    fn test_header_decode() {
        let header = ChunkHeader::decode(&[9, 0, 1, 0, 0]).unwrap();
        assert_eq!(header.message_id, 9);
        assert_eq!(header.total_chunks, 1);
        assert_eq!(header.payload_length, 0);
    }

    #[test]
    fn test_header_rejects_bad_fields() {
        assert!(ChunkHeader::decode(&[1, 1, 3, 0, 10]).is_err());
        assert!(ChunkHeader::decode(&[1, 0, 0, 0, 10]).is_err());
        assert!(ChunkHeader::decode(&[1, 0, 3, 0]).is_err());
        assert!(ChunkHeader::decode(&[1, 0, 3, 0, 10, 0]).is_err());
    }
}
