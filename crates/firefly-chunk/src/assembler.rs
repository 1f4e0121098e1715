//! In-order reassembly of chunked transfers.

use crate::error::ChunkError;
use crate::header::ChunkHeader;
use crate::{FRAME_DATA, FRAME_HEADER};

/// Reassembly state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerState {
    /// No transfer in progress
    Idle,
    /// Header seen, collecting data frames
    Receiving {
        /// Header that opened the transfer
        header: ChunkHeader,
        /// Data frames received so far
        received: usize,
    },
}

/// Rebuilds payloads from the frames of one peer.
///
/// Frames must arrive in order. A header frame always starts a new transfer,
/// abandoning any partial one.
#[derive(Debug)]
pub struct Assembler {
    state: AssemblerState,
    buffer: Vec<u8>,
}

impl Assembler {
    /// Create an idle assembler
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AssemblerState::Idle,
            buffer: Vec::new(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &AssemblerState {
        &self.state
    }

    /// True while a transfer is partially received
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, AssemblerState::Receiving { .. })
    }

    /// Drop any partial transfer
    pub fn reset(&mut self) {
        self.state = AssemblerState::Idle;
        self.buffer.clear();
    }

    /// Feed one frame.
    ///
    /// Returns `Ok(Some(payload))` when the transfer completes and `Ok(None)`
    /// while more frames are expected.
    ///
    /// # Errors
    ///
    /// - [`ChunkError::EmptyFrame`] / [`ChunkError::UnknownMarker`] for unframed input
    /// - [`ChunkError::MalformedHeader`] for an undecodable header
    /// - [`ChunkError::UnexpectedData`] for data with no transfer in progress
    /// - [`ChunkError::TooManyChunks`] if data overruns the announced count
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let (&marker, body) = frame.split_first().ok_or(ChunkError::EmptyFrame)?;

        match marker {
            FRAME_HEADER => self.start(body),
            FRAME_DATA => self.append(body),
            other => Err(ChunkError::UnknownMarker(other)),
        }
    }

    fn start(&mut self, body: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let header = ChunkHeader::decode(body)?;

        if let AssemblerState::Receiving {
            header: previous,
            received,
        } = &self.state
        {
            tracing::debug!(
                message_id = previous.message_id,
                received,
                expected = previous.data_chunks(),
                "Abandoning partial transfer for new header"
            );
        }

        self.buffer.clear();
        self.buffer.reserve(usize::from(header.payload_length));

        if header.payload_length == 0 {
            self.state = AssemblerState::Idle;
            return Ok(Some(Vec::new()));
        }

        self.state = AssemblerState::Receiving {
            header,
            received: 0,
        };
        Ok(None)
    }

    fn append(&mut self, body: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let AssemblerState::Receiving { header, received } = &mut self.state else {
            return Err(ChunkError::UnexpectedData);
        };

        if *received >= header.data_chunks() {
            let err = ChunkError::TooManyChunks {
                message_id: header.message_id,
                total_chunks: header.total_chunks,
            };
            self.reset();
            return Err(err);
        }

        self.buffer.extend_from_slice(body);
        *received += 1;

        let target = usize::from(header.payload_length);
        if *received == header.data_chunks() || self.buffer.len() >= target {
            let mut payload = std::mem::take(&mut self.buffer);
            payload.truncate(target);
            self.state = AssemblerState::Idle;
            return Ok(Some(payload));
        }

        Ok(None)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkConfig, Chunker};

    fn feed(assembler: &mut Assembler, frames: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut out = None;
        for (i, frame) in frames.iter().enumerate() {
            let result = assembler.push(frame).unwrap();
            if i + 1 < frames.len() {
                assert!(result.is_none(), "completed early at frame {i}");
            }
            out = result;
        }
        out
    }

    #[test]
    fn test_round_trip_various_lengths() {
        let chunker = Chunker::default();
        let max = chunker.config().max_payload();

        for len in [0usize, 1, 178, 179, 180, 358, 1000, 4096, max] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames = chunker.split(&payload, 9).unwrap();
            let mut assembler = Assembler::new();
            assert_eq!(feed(&mut assembler, &frames), Some(payload), "len {len}");
            assert!(!assembler.is_receiving());
        }
    }

    #[test]
    fn test_small_mtu_round_trip() {
        let chunker = Chunker::new(ChunkConfig { mtu: 20 }).unwrap();
        let payload = b"a payload spanning several tiny frames".to_vec();
        let frames = chunker.split(&payload, 1).unwrap();
        assert!(frames.iter().all(|f| f.len() <= 20));
        assert_eq!(feed(&mut Assembler::new(), &frames), Some(payload));
    }

    #[test]
    fn test_data_without_header() {
        let mut assembler = Assembler::new();
        assert_eq!(
            assembler.push(&[FRAME_DATA, 1, 2, 3]),
            Err(ChunkError::UnexpectedData)
        );
    }

    #[test]
    fn test_new_header_abandons_partial() {
        let chunker = Chunker::default();
        let first = chunker.split(&[1u8; 400], 1).unwrap();
        let second = chunker.split(b"second", 2).unwrap();

        let mut assembler = Assembler::new();
        assert!(assembler.push(&first[0]).unwrap().is_none());
        assert!(assembler.push(&first[1]).unwrap().is_none());

        assert_eq!(feed(&mut assembler, &second), Some(b"second".to_vec()));
    }

    #[test]
    fn test_empty_payload_completes_on_header() {
        let frames = Chunker::default().split(&[], 4).unwrap();
        let mut assembler = Assembler::new();
        assert_eq!(assembler.push(&frames[0]).unwrap(), Some(Vec::new()));
        assert_eq!(assembler.state(), &AssemblerState::Idle);
    }

    #[test]
    fn test_excess_data_rejected() {
        let frames = Chunker::default().split(b"short", 5).unwrap();
        let mut assembler = Assembler::new();
        assert_eq!(feed(&mut assembler, &frames), Some(b"short".to_vec()));
        assert_eq!(
            assembler.push(&[FRAME_DATA, 0]),
            Err(ChunkError::UnexpectedData)
        );
    }

    #[test]
    fn test_truncates_to_announced_length() {
        // Header announces 3 bytes over one data frame carrying 5
        let header = ChunkHeader::new(1, 2, 3).encode();
        let mut frame = vec![FRAME_HEADER];
        frame.extend_from_slice(&header);

        let mut assembler = Assembler::new();
        assert!(assembler.push(&frame).unwrap().is_none());
        assert_eq!(
            assembler.push(&[FRAME_DATA, 1, 2, 3, 4, 5]).unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_data_beyond_announced_count() {
        // Announces no data frames but a non-zero length
        let mut frame = vec![FRAME_HEADER];
        frame.extend_from_slice(&ChunkHeader::new(6, 1, 10).encode());

        let mut assembler = Assembler::new();
        assert!(assembler.push(&frame).unwrap().is_none());
        assert_eq!(
            assembler.push(&[FRAME_DATA, 1]),
            Err(ChunkError::TooManyChunks {
                message_id: 6,
                total_chunks: 1
            })
        );
        assert!(!assembler.is_receiving());
    }

    #[test]
    fn test_unframed_input() {
        let mut assembler = Assembler::new();
        assert_eq!(assembler.push(&[]), Err(ChunkError::EmptyFrame));
        assert_eq!(assembler.push(&[0x42]), Err(ChunkError::UnknownMarker(0x42)));
        assert!(matches!(
            assembler.push(&[FRAME_HEADER, 1, 2]),
            Err(ChunkError::MalformedHeader(_))
        ));
    }
}
