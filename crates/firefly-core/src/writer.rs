//! Chunked payload writes.
//!
//! Every payload a node sends (forwarded packets, media, ACKs) goes through
//! one [`FrameWriter`]. It holds a write lock for the whole frame sequence so
//! two payloads never interleave on the link; the peer's assembler would
//! otherwise see a second header mid-transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use firefly_chunk::{ChunkConfig, Chunker};
use firefly_transport::BleTransport;
use tokio::sync::Mutex;

use crate::error::Result;

/// Serialized, chunked writer over one transport
pub struct FrameWriter {
    transport: Arc<dyn BleTransport>,
    chunker: Chunker,
    next_message_id: AtomicU8,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("mtu", &self.chunker.config().mtu)
            .finish_non_exhaustive()
    }
}

impl FrameWriter {
    /// Create a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the MTU is too small to frame.
    pub fn new(transport: Arc<dyn BleTransport>, config: ChunkConfig) -> Result<Self> {
        Ok(Self {
            transport,
            chunker: Chunker::new(config)?,
            next_message_id: AtomicU8::new(0),
            write_lock: Mutex::new(()),
        })
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn BleTransport> {
        &self.transport
    }

    /// Largest payload one call can carry
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.chunker.config().max_payload()
    }

    /// Chunk `payload` and write every frame in order.
    ///
    /// Returns the message id used for the transfer.
    ///
    /// # Errors
    ///
    /// Returns a chunk error if the payload is too large, or the first
    /// transport error hit. Frames already written are not retracted.
    pub async fn send(&self, payload: &[u8]) -> Result<u8> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let frames = self.chunker.split(payload, message_id)?;

        let _guard = self.write_lock.lock().await;
        for frame in &frames {
            self.transport.write_raw(frame).await?;
        }

        tracing::trace!(
            message_id,
            frames = frames.len(),
            bytes = payload.len(),
            "Payload written"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FireflyError;
    use firefly_chunk::Assembler;
    use firefly_transport::LoopbackHub;

    #[tokio::test]
    async fn test_send_reassembles_on_peer() {
        let hub = LoopbackHub::new();
        let a = hub.radio("a");
        let b = hub.radio("b");
        hub.link("a", "b");
        let mut rx = b.notifications();

        let writer = FrameWriter::new(Arc::new(a), ChunkConfig::default()).unwrap();
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        writer.send(&payload).await.unwrap();

        let mut assembler = Assembler::new();
        let mut out = None;
        while out.is_none() {
            let frame = rx.recv().await.unwrap();
            out = assembler.push(&frame.data).unwrap();
        }
        assert_eq!(out.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_send_errors() {
        let hub = LoopbackHub::new();
        let a = hub.radio("a");
        let writer = FrameWriter::new(Arc::new(a.clone()), ChunkConfig::default()).unwrap();

        assert!(matches!(
            writer.send(b"x").await,
            Err(FireflyError::Transport(_))
        ));

        hub.link("a", "b");
        let too_big = vec![0u8; writer.max_payload() + 1];
        assert!(matches!(
            writer.send(&too_big).await,
            Err(FireflyError::Chunk(_))
        ));
        assert_eq!(a.write_attempts(), 1);
    }

    #[tokio::test]
    async fn test_message_ids_increment() {
        let hub = LoopbackHub::new();
        hub.link("a", "b");
        let writer = FrameWriter::new(Arc::new(hub.radio("a")), ChunkConfig::default()).unwrap();
        assert_eq!(writer.send(b"one").await.unwrap(), 0);
        assert_eq!(writer.send(b"two").await.unwrap(), 1);
    }
}
