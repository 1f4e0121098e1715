//! Judge-side media delivery.
//!
//! Photos attached to votes are too large for the packet path, so they go
//! straight to the coordinator over a direct link:
//!
//! ```text
//! judge ──[0x02][voteId][image bytes] (chunked)──▶ coordinator
//! judge ◀────────────[0xA1][voteId]────────────── coordinator
//! ```
//!
//! Each item is retried with exponential backoff. Items that still fail count
//! toward a circuit breaker shared across the pass; while it is open, passes
//! are skipped without touching the radio.
//!
//! A poller starts a pass whenever the link is strong enough. It runs under a
//! per-connection cancellation token: a disconnect cancels the token (and any
//! in-flight delivery), a reconnect issues a fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use firefly_transport::TransportError;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::clock::Clock;
use crate::config::MediaSyncConfig;
use crate::error::{FireflyError, SyncError};
use crate::events::{EventBus, FireflyEvent};
use crate::packet::{TAG_ACK, TAG_MEDIA};
use crate::swarm::SwarmStateMachine;
use crate::vote::{Vote, VoteId, VoteStore};
use crate::writer::FrameWriter;

/// ACK frame length: tag plus vote id
pub const ACK_LEN: usize = 17;

/// Build a media payload
#[must_use]
pub fn media_payload(id: &VoteId, media: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ACK_LEN + media.len());
    payload.push(TAG_MEDIA);
    payload.extend_from_slice(id.as_bytes());
    payload.extend_from_slice(media);
    payload
}

/// Build an ACK payload
#[must_use]
pub fn ack_payload(id: &VoteId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ACK_LEN);
    payload.push(TAG_ACK);
    payload.extend_from_slice(id.as_bytes());
    payload
}

/// Parse an ACK payload
#[must_use]
pub fn parse_ack(payload: &[u8]) -> Option<VoteId> {
    match payload.split_first() {
        Some((&TAG_ACK, id)) if payload.len() == ACK_LEN => VoteId::from_slice(id),
        _ => None,
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items acknowledged
    pub delivered: usize,
    /// Items that exhausted their retries
    pub failed: usize,
    /// Items not attempted because the circuit opened mid-pass
    pub skipped: usize,
}

/// Removes the pending ACK entry however the wait ends
struct PendingAck<'a> {
    map: &'a DashMap<VoteId, oneshot::Sender<()>>,
    id: VoteId,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// Clears the pass flag however the pass ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Delivers pending media to the coordinator
pub struct MediaSyncEngine {
    config: MediaSyncConfig,
    writer: Arc<FrameWriter>,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    breaker: CircuitBreaker,
    swarm: Option<SwarmStateMachine>,
    pending_acks: DashMap<VoteId, oneshot::Sender<()>>,
    pass_in_flight: AtomicBool,
    paused: AtomicBool,
}

impl std::fmt::Debug for MediaSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSyncEngine")
            .field("pending_acks", &self.pending_acks.len())
            .field("pass_in_flight", &self.pass_in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MediaSyncEngine {
    /// Create an engine writing through `writer`
    pub fn new(
        config: MediaSyncConfig,
        writer: Arc<FrameWriter>,
        store: Arc<dyn VoteStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone(), Arc::clone(&clock));
        Self {
            config,
            writer,
            store,
            clock,
            events,
            breaker,
            swarm: None,
            pending_acks: DashMap::new(),
            pass_in_flight: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Consult the swarm for mule mode and report coordinator contact to it
    #[must_use]
    pub fn with_swarm(mut self, swarm: SwarmStateMachine) -> Self {
        self.swarm = Some(swarm);
        self
    }

    /// Breaker guarding this engine
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// ACKs currently awaited
    #[must_use]
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    /// Signal gate currently in force (dBm)
    #[must_use]
    pub fn rssi_threshold(&self) -> i16 {
        if self.swarm.as_ref().is_some_and(SwarmStateMachine::is_mule_mode) {
            self.config.mule_rssi_threshold
        } else {
            self.config.rssi_threshold
        }
    }

    /// True when the link is up and strong enough for a pass
    #[must_use]
    pub fn should_sync(&self) -> bool {
        let transport = self.writer.transport();
        transport.is_connected()
            && transport
                .last_signal_strength()
                .is_some_and(|rssi| rssi > self.rssi_threshold())
    }

    /// Resolve a pending delivery from an inbound ACK payload.
    ///
    /// Returns `true` if the ACK matched an awaited vote.
    pub fn handle_ack(&self, payload: &[u8]) -> bool {
        let Some(id) = parse_ack(payload) else {
            tracing::debug!(len = payload.len(), "Malformed ACK ignored");
            return false;
        };

        if let Some(swarm) = &self.swarm {
            swarm.record_coordinator_contact();
        }

        match self.pending_acks.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(());
                true
            }
            None => {
                tracing::trace!(vote = %id, "ACK for a vote not awaited");
                false
            }
        }
    }

    /// Run one sync pass over every vote with pending media.
    ///
    /// # Errors
    ///
    /// - [`SyncError::CircuitOpen`] if the breaker is open (nothing written)
    /// - [`SyncError::Storage`] if the pending list cannot be loaded
    ///
    /// Per-item failures are reported in the [`SyncReport`], not as errors.
    pub async fn sync_pending(&self) -> Result<SyncReport, SyncError> {
        if self
            .pass_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SyncReport::default());
        }
        let _guard = PassGuard(&self.pass_in_flight);

        if !self.breaker.allows_request().await {
            self.mark_paused();
            tracing::debug!("Circuit open, skipping sync pass");
            return Err(SyncError::CircuitOpen);
        }

        let votes = match self.store.votes_with_pending_media().await {
            Ok(votes) => votes,
            Err(e) => {
                let err = SyncError::Storage(e.0);
                self.record_failure().await;
                return Err(err);
            }
        };

        let mut report = SyncReport::default();
        let total = votes.len();

        for (index, vote) in votes.iter().enumerate() {
            if !self.breaker.allows_request().await {
                report.skipped = total - index;
                break;
            }

            match self.deliver_with_retry(vote).await {
                Ok(()) => {
                    report.delivered += 1;
                    self.record_success().await;
                    if let Err(e) = self.store.mark_media_synced(&vote.id).await {
                        tracing::warn!(vote = %vote.id, error = %e, "Delivered but not marked synced");
                    }
                    self.events.emit(FireflyEvent::MediaDelivered {
                        vote_id: vote.id.to_hex(),
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(vote = %vote.id, error = %e, "Media delivery failed");
                    if e.counts_as_failure() {
                        self.record_failure().await;
                    }
                    self.events.emit(FireflyEvent::MediaFailed {
                        vote_id: vote.id.to_hex(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if total > 0 {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "Sync pass finished"
            );
        }
        Ok(report)
    }

    /// Deliver one vote's media, retrying with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once retries are exhausted, or the
    /// first non-retryable error.
    pub async fn deliver_with_retry(&self, vote: &Vote) -> Result<(), SyncError> {
        let media = self
            .store
            .load_media(vote)
            .await
            .map_err(|e| SyncError::Storage(e.0))?;
        let payload = media_payload(&vote.id, &media);

        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let err = match self.deliver_once(&vote.id, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            attempt += 1;
            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }

            let backoff = self.config.retry.backoff_duration(attempt - 1);
            tracing::debug!(vote = %vote.id, attempt, backoff = ?backoff, error = %err, "Retrying media delivery");
            self.clock.sleep(backoff).await;
        }
    }

    async fn deliver_once(&self, id: &VoteId, payload: &[u8]) -> Result<(), SyncError> {
        // Register before writing so a fast ACK cannot be missed
        let (tx, rx) = oneshot::channel();
        self.pending_acks.insert(*id, tx);
        let _pending = PendingAck {
            map: &self.pending_acks,
            id: *id,
        };

        self.writer.send(payload).await.map_err(|e| match e {
            FireflyError::Transport(t) => SyncError::TransportWrite(t),
            FireflyError::Chunk(c) => SyncError::Payload(c),
            other => SyncError::TransportWrite(TransportError::Other(other.to_string())),
        })?;

        let timeout = self.clock.sleep(self.config.ack_timeout);
        tokio::select! {
            ack = rx => ack.map_err(|_| SyncError::AckTimeout(id.to_hex())),
            () = timeout => Err(SyncError::AckTimeout(id.to_hex())),
        }
    }

    async fn record_success(&self) {
        self.breaker.record_success().await;
        if self.breaker.state().await == CircuitState::Closed
            && self.paused.swap(false, Ordering::AcqRel)
        {
            tracing::info!("Media sync resumed");
            self.events.emit(FireflyEvent::SyncResumed);
        }
    }

    async fn record_failure(&self) {
        if self.breaker.record_failure().await {
            self.mark_paused();
        }
    }

    fn mark_paused(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            self.events.emit(FireflyEvent::SyncPaused);
        }
    }

    /// Poll while connected, restarting on each reconnect, until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut connection = self.writer.transport().connection_state();

        loop {
            if !*connection.borrow_and_update() {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    changed = connection.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }

            let token = shutdown.child_token();
            tracing::debug!("Link up, media poller started");

            tokio::select! {
                () = self.poll(token.clone()) => {}
                () = wait_for_disconnect(&mut connection) => {
                    tracing::debug!("Link down, media poller stopped");
                }
                () = shutdown.cancelled() => {}
            }
            token.cancel();

            if shutdown.is_cancelled() {
                return;
            }
        }
    }

    async fn poll(&self, token: CancellationToken) {
        loop {
            if self.should_sync() && !self.pass_in_flight.load(Ordering::Acquire) {
                match self.sync_pending().await {
                    Ok(_) | Err(SyncError::CircuitOpen) => {}
                    Err(e) => tracing::warn!(error = %e, "Sync pass failed"),
                }
            }

            let sleep = self.clock.sleep(self.config.poll_interval);
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep => {}
            }
        }
    }
}

async fn wait_for_disconnect(connection: &mut watch::Receiver<bool>) {
    // A closed channel means the transport is gone
    let _ = connection.wait_for(|up| !*up).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChunkConfig;
    use crate::vote::InMemoryVoteStore;
    use firefly_chunk::Assembler;
    use firefly_transport::{BleTransport, LoopbackHub, LoopbackRadio};
    use std::time::Duration;

    struct Fixture {
        hub: LoopbackHub,
        judge: LoopbackRadio,
        clock: ManualClock,
        store: Arc<InMemoryVoteStore>,
        engine: Arc<MediaSyncEngine>,
        events: EventBus,
    }

    fn fixture() -> Fixture {
        let hub = LoopbackHub::new();
        let judge = hub.radio("judge");
        hub.link("judge", "coord");
        judge.set_signal_strength(Some(-60));

        let clock = ManualClock::default();
        let store = Arc::new(InMemoryVoteStore::new());
        let events = EventBus::default();
        let writer =
            Arc::new(FrameWriter::new(Arc::new(judge.clone()), ChunkConfig::default()).unwrap());
        let engine = Arc::new(MediaSyncEngine::new(
            MediaSyncConfig::default(),
            writer,
            store.clone(),
            Arc::new(clock.clone()),
            events.clone(),
        ));

        // Route ACKs arriving on the judge radio into the engine
        let mut inbound = judge.notifications();
        let router = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut assembler = Assembler::new();
            while let Ok(frame) = inbound.recv().await {
                if let Ok(Some(payload)) = assembler.push(&frame.data) {
                    router.handle_ack(&payload);
                }
            }
        });

        Fixture {
            hub,
            judge,
            clock,
            store,
            engine,
            events,
        }
    }

    fn add_vote(store: &InMemoryVoteStore, media: Vec<u8>) -> Vote {
        let vote = Vote::new("ev", "p1", "judge", serde_json::json!({"score": 7}))
            .with_media(format!("img-{}", VoteId::generate()));
        store.insert_with_media(vote.clone(), media);
        vote
    }

    /// Coordinator stand-in: reassembles media and ACKs every item
    fn spawn_acker(hub: &LoopbackHub) -> tokio::task::JoinHandle<()> {
        let coord = hub.radio("coord");
        let mut rx = coord.notifications();
        tokio::spawn(async move {
            let writer = FrameWriter::new(Arc::new(coord), ChunkConfig::default()).unwrap();
            let mut assembler = Assembler::new();
            while let Ok(frame) = rx.recv().await {
                if let Ok(Some(payload)) = assembler.push(&frame.data) {
                    let id = VoteId::from_slice(&payload[1..17]).unwrap();
                    writer.send(&ack_payload(&id)).await.unwrap();
                }
            }
        })
    }

    #[test]
    fn test_payload_layout() {
        let id = VoteId::from_bytes([7; 16]);
        let media = media_payload(&id, b"jpeg");
        assert_eq!(media[0], 0x02);
        assert_eq!(&media[1..17], &[7; 16]);
        assert_eq!(&media[17..], b"jpeg");

        let ack = ack_payload(&id);
        assert_eq!(ack.len(), ACK_LEN);
        assert_eq!(parse_ack(&ack), Some(id));
        assert_eq!(parse_ack(&ack[..16]), None);
        assert_eq!(parse_ack(&media[..17]), None);
    }

    #[tokio::test]
    async fn test_delivery_with_ack() {
        let f = fixture();
        let _acker = spawn_acker(&f.hub);
        let vote = add_vote(&f.store, vec![0xEE; 2000]);
        let mut events = f.events.subscribe();

        let report = f.engine.sync_pending().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(f.engine.pending_ack_count(), 0);
        assert!(f.store.get(&vote.id).unwrap().media_synced);
        assert_eq!(
            events.recv().await.unwrap(),
            FireflyEvent::MediaDelivered {
                vote_id: vote.id.to_hex()
            }
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_retries_then_fails() {
        let f = fixture();
        add_vote(&f.store, vec![1; 10]);

        let engine = Arc::clone(&f.engine);
        let pass = tokio::spawn(async move { engine.sync_pending().await });

        // Attempt 1 times out, backoff 500ms, attempt 2, backoff 1s, attempt 3
        for step in [10_000, 500, 10_000, 1_000, 10_000] {
            f.clock.wait_for_sleepers(1).await;
            f.clock.advance(Duration::from_millis(step));
        }

        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(f.engine.pending_ack_count(), 0);
        // One header and one data frame per attempt
        assert_eq!(f.judge.stats().frames_sent, 6);
        assert_eq!(f.engine.breaker().metrics().await.failure_count, 1);
    }

    #[tokio::test]
    async fn test_write_failures_retry_with_backoff() {
        let f = fixture();
        let _acker = spawn_acker(&f.hub);
        add_vote(&f.store, vec![1; 10]);
        f.judge.fail_next_writes(1);

        let engine = Arc::clone(&f.engine);
        let pass = tokio::spawn(async move { engine.sync_pending().await });
        f.clock.wait_for_sleepers(1).await;
        f.clock.advance(Duration::from_millis(500));

        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trip_and_skip() {
        let f = fixture();
        f.judge.set_write_failure(true);
        for _ in 0..5 {
            add_vote(&f.store, vec![9; 4]);
        }
        let mut events = f.events.subscribe();

        let engine = Arc::clone(&f.engine);
        let pass = tokio::spawn(async move { engine.sync_pending().await });
        // Two backoffs per item
        for _ in 0..5 {
            for step in [500, 1_000] {
                f.clock.wait_for_sleepers(1).await;
                f.clock.advance(Duration::from_millis(step));
            }
        }
        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.failed, 5);
        assert_eq!(f.engine.breaker().state().await, CircuitState::Open);

        let attempts_before = f.judge.write_attempts();
        assert_eq!(f.engine.sync_pending().await, Err(SyncError::CircuitOpen));
        assert_eq!(f.judge.write_attempts(), attempts_before);

        let mut saw_pause = false;
        while let Ok(event) = events.try_recv() {
            saw_pause |= event == FireflyEvent::SyncPaused;
        }
        assert!(saw_pause);

        // After the open window one success closes the circuit
        f.judge.set_write_failure(false);
        let _acker = spawn_acker(&f.hub);
        f.clock.advance(Duration::from_secs(60));
        let report = f.engine.sync_pending().await.unwrap();
        assert_eq!(report.delivered, 5);
        assert_eq!(f.engine.breaker().state().await, CircuitState::Closed);
        assert_eq!(f.engine.breaker().metrics().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_counts_toward_breaker() {
        let f = fixture();
        f.store.set_fail_reads(true);
        for _ in 0..5 {
            assert!(matches!(
                f.engine.sync_pending().await,
                Err(SyncError::Storage(_))
            ));
        }
        assert_eq!(f.engine.sync_pending().await, Err(SyncError::CircuitOpen));
    }

    #[tokio::test]
    async fn test_should_sync_threshold() {
        let f = fixture();
        assert!(f.engine.should_sync());
        f.judge.set_signal_strength(Some(-70));
        assert!(!f.engine.should_sync());
        f.judge.set_signal_strength(Some(-69));
        assert!(f.engine.should_sync());
        f.hub.unlink("judge", "coord");
        assert!(!f.engine.should_sync());
    }

    #[tokio::test]
    async fn test_unmatched_ack() {
        let f = fixture();
        assert!(!f.engine.handle_ack(&ack_payload(&VoteId::generate())));
        assert!(!f.engine.handle_ack(&[TAG_ACK, 1, 2]));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_poller_and_clears_pending() {
        let f = fixture();
        add_vote(&f.store, vec![5; 50]);
        let shutdown = CancellationToken::new();

        let engine = Arc::clone(&f.engine);
        let token = shutdown.clone();
        let runner = tokio::spawn(async move { engine.run(token).await });

        // First pass is waiting for an ACK that never comes
        while f.engine.pending_ack_count() == 0 {
            tokio::task::yield_now().await;
        }
        f.hub.unlink("judge", "coord");
        while f.engine.pending_ack_count() != 0 {
            tokio::task::yield_now().await;
        }
        assert!(!f.judge.is_connected());

        shutdown.cancel();
        runner.await.unwrap();
    }
}
