//! Coordinator side of media delivery: store, then acknowledge.

use std::sync::Arc;

use crate::error::{FireflyError, PacketError, Result, SyncError};
use crate::media_sync::{ACK_LEN, ack_payload};
use crate::packet::TAG_MEDIA;
use crate::vote::{MediaSink, VoteId};
use crate::writer::FrameWriter;

/// Accepts `[0x02][voteId][bytes]` payloads and answers with an ACK
pub struct MediaReceiver {
    writer: Arc<FrameWriter>,
    sink: Arc<dyn MediaSink>,
}

impl std::fmt::Debug for MediaReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaReceiver").finish_non_exhaustive()
    }
}

impl MediaReceiver {
    /// Create a receiver replying through `writer`
    pub fn new(writer: Arc<FrameWriter>, sink: Arc<dyn MediaSink>) -> Self {
        Self { writer, sink }
    }

    /// Store one media payload and acknowledge it.
    ///
    /// The ACK is only written once the sink accepted the bytes, so a judge
    /// never marks media synced that the coordinator does not hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed, the sink fails, or the
    /// ACK cannot be written.
    pub async fn handle_media(&self, payload: &[u8]) -> Result<VoteId> {
        let id = match payload.split_first() {
            Some((&TAG_MEDIA, rest)) if payload.len() >= ACK_LEN => {
                VoteId::from_slice(&rest[..16])
                    .ok_or(FireflyError::Packet(PacketError::InvalidField("vote id")))?
            }
            _ => return Err(PacketError::InvalidField("media payload").into()),
        };

        let media = payload[ACK_LEN..].to_vec();
        let len = media.len();
        self.sink
            .store_media(id, media)
            .await
            .map_err(|e| SyncError::Storage(e.0))?;

        self.writer.send(&ack_payload(&id)).await?;
        tracing::info!(vote = %id, bytes = len, "Media received");
        Ok(id)
    }
}
