//! Payload splitting.

use crate::error::ChunkError;
use crate::header::ChunkHeader;
use crate::{ChunkConfig, FRAME_DATA, FRAME_HEADER, HEADER_SIZE, MIN_MTU};

/// Splits payloads into MTU-sized frames.
///
/// The output is one header frame followed by `ceil(len / (mtu - 1))` data
/// frames, each at most `mtu` bytes long. Frames must be written in order.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::MtuTooSmall`] if the MTU cannot carry framing.
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkError> {
        if config.mtu < MIN_MTU {
            return Err(ChunkError::MtuTooSmall(config.mtu));
        }
        Ok(Self { config })
    }

    /// Chunker with the default 180-byte MTU
    #[must_use]
    pub fn with_default_mtu() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// Split `payload` into a header frame followed by data frames.
    ///
    /// An empty payload yields only the header frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::TooLarge`] if the payload needs more than 254
    /// data frames or exceeds a 16-bit length.
    pub fn split(&self, payload: &[u8], message_id: u8) -> Result<Vec<Vec<u8>>, ChunkError> {
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(ChunkError::TooLarge {
                len: payload.len(),
                max,
            });
        }

        let per_chunk = self.config.data_per_chunk();
        let data_chunks = payload.len().div_ceil(per_chunk);

        // Bounds checked against max_payload above
        let total_chunks = u8::try_from(data_chunks + 1).map_err(|_| ChunkError::TooLarge {
            len: payload.len(),
            max,
        })?;
        let payload_length = u16::try_from(payload.len()).map_err(|_| ChunkError::TooLarge {
            len: payload.len(),
            max,
        })?;

        let header = ChunkHeader::new(message_id, total_chunks, payload_length);
        let mut frames = Vec::with_capacity(data_chunks + 1);

        let mut header_frame = Vec::with_capacity(1 + HEADER_SIZE);
        header_frame.push(FRAME_HEADER);
        header_frame.extend_from_slice(&header.encode());
        frames.push(header_frame);

        for slice in payload.chunks(per_chunk) {
            let mut frame = Vec::with_capacity(1 + slice.len());
            frame.push(FRAME_DATA);
            frame.extend_from_slice(slice);
            frames.push(frame);
        }

        tracing::trace!(
            message_id,
            total_chunks,
            payload_length,
            "Split payload into frames"
        );

        Ok(frames)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::with_default_mtu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_shape() {
        let chunker = Chunker::default();
        let payload = vec![0xAB; 500];
        let frames = chunker.split(&payload, 3).unwrap();

        // 500 bytes at 179 per frame = 3 data frames
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], vec![FRAME_HEADER, 3, 0, 4, 0x01, 0xF4]);
        assert!(frames.iter().all(|f| f.len() <= 180));
        assert_eq!(frames[1].len(), 180);
        assert_eq!(frames[3].len(), 1 + 500 - 2 * 179);
        assert!(frames[1..].iter().all(|f| f[0] == FRAME_DATA));
    }

    #[test]
    fn test_split_empty_payload() {
        let frames = Chunker::default().split(&[], 1).unwrap();
        assert_eq!(frames, vec![vec![FRAME_HEADER, 1, 0, 1, 0, 0]]);
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunker = Chunker::default();
        let frames = chunker.split(&[1u8; 179 * 2], 0).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].len(), 180);
    }

    #[test]
    fn test_split_max_payload() {
        let chunker = Chunker::default();
        let max = chunker.config().max_payload();
        assert_eq!(max, 254 * 179);

        let frames = chunker.split(&vec![7u8; max], 0).unwrap();
        assert_eq!(frames.len(), 255);
        assert_eq!(frames[0][3], 255);
    }

    #[test]
    fn test_split_too_large() {
        let chunker = Chunker::default();
        let max = chunker.config().max_payload();
        let err = chunker.split(&vec![0u8; max + 1], 0).unwrap_err();
        assert_eq!(err, ChunkError::TooLarge { len: max + 1, max });
    }

    #[test]
    fn test_split_caps_at_u16_length() {
        let chunker = Chunker::new(ChunkConfig { mtu: 512 }).unwrap();
        assert_eq!(chunker.config().max_payload(), u16::MAX as usize);
        assert!(chunker.split(&vec![0u8; u16::MAX as usize + 1], 0).is_err());
    }

    #[test]
    fn test_mtu_too_small() {
        assert_eq!(
            Chunker::new(ChunkConfig { mtu: 4 }).unwrap_err(),
            ChunkError::MtuTooSmall(4)
        );
    }
}
