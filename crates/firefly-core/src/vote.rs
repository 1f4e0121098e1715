//! Vote records and the storage contracts the engine depends on.
//!
//! Durable storage lives outside the engine. [`VoteStore`] is what the media
//! engine needs from it on the judge side; [`MediaSink`] is what the
//! coordinator hands received media to. In-memory implementations back tests
//! and the simulator.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage failure reported by a collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StorageError(pub String);

/// 16-byte vote identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoteId([u8; 16]);

impl VoteId {
    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(firefly_crypto::random::random_16())
    }

    /// Parse from a 16-byte slice
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(Self)
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoteId({})", self.to_hex())
    }
}

impl TryFrom<String> for VoteId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let raw = hex::decode(&s).map_err(|e| format!("invalid vote id: {e}"))?;
        Self::from_slice(&raw).ok_or_else(|| format!("vote id must be 16 bytes, got {}", raw.len()))
    }
}

impl From<VoteId> for String {
    fn from(id: VoteId) -> Self {
        id.to_hex()
    }
}

/// Backend sync state of a vote record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Not yet uploaded
    #[default]
    Pending,
    /// Uploaded
    Synced,
    /// Upload failed
    SyncError,
}

/// A judge's vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Vote identifier
    pub id: VoteId,
    /// Event being judged
    pub event_id: String,
    /// Project being scored
    pub project_id: String,
    /// Judge casting the vote
    pub judge_id: String,
    /// Opaque scoring payload
    pub scores: serde_json::Value,
    /// Backend sync state
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Local reference to an attached photo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    /// Set once the coordinator acknowledged the media
    #[serde(default)]
    pub media_synced: bool,
}

impl Vote {
    /// New pending vote with no media
    pub fn new(
        event_id: impl Into<String>,
        project_id: impl Into<String>,
        judge_id: impl Into<String>,
        scores: serde_json::Value,
    ) -> Self {
        Self {
            id: VoteId::generate(),
            event_id: event_id.into(),
            project_id: project_id.into(),
            judge_id: judge_id.into(),
            scores,
            sync_status: SyncStatus::Pending,
            media_ref: None,
            media_synced: false,
        }
    }

    /// Attach a media reference
    #[must_use]
    pub fn with_media(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }

    /// True if media is attached and not yet acknowledged
    #[must_use]
    pub fn has_pending_media(&self) -> bool {
        self.media_ref.is_some() && !self.media_synced
    }
}

/// Judge-side vote persistence
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Persist a vote, replacing any record with the same id
    async fn save_vote(&self, vote: Vote) -> Result<(), StorageError>;

    /// Votes with media still awaiting acknowledgement
    async fn votes_with_pending_media(&self) -> Result<Vec<Vote>, StorageError>;

    /// Load the media bytes a vote refers to
    async fn load_media(&self, vote: &Vote) -> Result<Vec<u8>, StorageError>;

    /// Mark a vote's media as acknowledged
    async fn mark_media_synced(&self, id: &VoteId) -> Result<(), StorageError>;
}

/// Coordinator-side destination for received media
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Store media received for `vote_id`
    async fn store_media(&self, vote_id: VoteId, media: Vec<u8>) -> Result<(), StorageError>;
}

/// Vote store held in memory
#[derive(Debug, Default)]
pub struct InMemoryVoteStore {
    votes: DashMap<VoteId, Vote>,
    media: DashMap<String, Vec<u8>>,
    fail_reads: AtomicBool,
}

impl InMemoryVoteStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a vote together with its media bytes
    pub fn insert_with_media(&self, vote: Vote, media: Vec<u8>) {
        if let Some(media_ref) = &vote.media_ref {
            self.media.insert(media_ref.clone(), media);
        }
        self.votes.insert(vote.id, vote);
    }

    /// Make pending-media queries fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Snapshot of one vote
    #[must_use]
    pub fn get(&self, id: &VoteId) -> Option<Vote> {
        self.votes.get(id).map(|v| v.clone())
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    async fn save_vote(&self, vote: Vote) -> Result<(), StorageError> {
        self.votes.insert(vote.id, vote);
        Ok(())
    }

    async fn votes_with_pending_media(&self) -> Result<Vec<Vote>, StorageError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(StorageError("vote store unavailable".into()));
        }
        let mut pending: Vec<Vote> = self
            .votes
            .iter()
            .filter(|v| v.has_pending_media())
            .map(|v| v.clone())
            .collect();
        pending.sort_by_key(|v| v.id);
        Ok(pending)
    }

    async fn load_media(&self, vote: &Vote) -> Result<Vec<u8>, StorageError> {
        let media_ref = vote
            .media_ref
            .as_deref()
            .ok_or_else(|| StorageError(format!("vote {} has no media", vote.id)))?;
        self.media
            .get(media_ref)
            .map(|m| m.clone())
            .ok_or_else(|| StorageError(format!("media {media_ref} not found")))
    }

    async fn mark_media_synced(&self, id: &VoteId) -> Result<(), StorageError> {
        let mut vote = self
            .votes
            .get_mut(id)
            .ok_or_else(|| StorageError(format!("vote {id} not found")))?;
        vote.media_synced = true;
        Ok(())
    }
}

/// Media sink held in memory
#[derive(Debug, Default)]
pub struct InMemoryMediaSink {
    received: DashMap<VoteId, Vec<u8>>,
}

impl InMemoryMediaSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Media received for `id`
    #[must_use]
    pub fn get(&self, id: &VoteId) -> Option<Vec<u8>> {
        self.received.get(id).map(|m| m.clone())
    }

    /// Number of items received
    #[must_use]
    pub fn len(&self) -> usize {
        self.received.len()
    }

    /// True if nothing was received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}

#[async_trait]
impl MediaSink for InMemoryMediaSink {
    async fn store_media(&self, vote_id: VoteId, media: Vec<u8>) -> Result<(), StorageError> {
        self.received.insert(vote_id, media);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_id_hex() {
        let id = VoteId::from_bytes([0xAB; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
        assert_eq!(VoteId::try_from(id.to_hex()).unwrap(), id);
        assert!(VoteId::try_from("abcd".to_string()).is_err());
    }

    #[test]
    fn test_vote_json_shape() {
        let vote = Vote::new("ev", "proj", "judge", serde_json::json!({"design": 8}))
            .with_media("photo-1");
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["judgeId"], "judge");
        assert_eq!(json["syncStatus"], "pending");
        assert_eq!(json["mediaRef"], "photo-1");
        let back: Vote = serde_json::from_value(json).unwrap();
        assert_eq!(back, vote);
    }

    #[tokio::test]
    async fn test_in_memory_store_pending_media() {
        let store = InMemoryVoteStore::new();
        let with_media = Vote::new("e", "p", "j", serde_json::Value::Null).with_media("img");
        let without = Vote::new("e", "p", "j", serde_json::Value::Null);
        store.insert_with_media(with_media.clone(), vec![1, 2, 3]);
        store.save_vote(without).await.unwrap();

        let pending = store.votes_with_pending_media().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.load_media(&pending[0]).await.unwrap(), vec![1, 2, 3]);

        store.mark_media_synced(&with_media.id).await.unwrap();
        assert!(store.votes_with_pending_media().await.unwrap().is_empty());
        assert!(store.get(&with_media.id).unwrap().media_synced);

        store.set_fail_reads(true);
        assert!(store.votes_with_pending_media().await.is_err());
    }
}
