//! Node orchestration.
//!
//! [`FireflyNode`] wires the engine together over one transport and runs its
//! long-lived tasks:
//!
//! - the swarm heartbeat (not on the coordinator, which never relays)
//! - the relay loop over inbound notifications
//! - the media poller, when a vote store is attached
//!
//! All of them stop through a single cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use firefly_crypto::{AeadKey, SigningKey};
use firefly_transport::{BleTransport, RelayHosting};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::FireflyConfig;
use crate::error::{FireflyError, PacketError, Result, SyncError};
use crate::events::{EventBus, FireflyEvent};
use crate::media_receiver::MediaReceiver;
use crate::media_sync::MediaSyncEngine;
use crate::packet::{NodusPacket, PacketType};
use crate::relay::{Delivery, RelayEngine};
use crate::swarm::{SwarmState, SwarmStateMachine};
use crate::tracker::PacketTracker;
use crate::trust::TrustStore;
use crate::validator::PacketValidator;
use crate::vote::{MediaSink, Vote, VoteStore};
use crate::writer::FrameWriter;

/// Buffered deliveries before the relay loop waits on the application
pub const DELIVERY_CAPACITY: usize = 64;

/// Collaborators a node runs over
#[derive(Clone)]
pub struct NodeParts {
    /// Radio link
    pub transport: Arc<dyn BleTransport>,
    /// Relay advertising capability
    pub hosting: Arc<dyn RelayHosting>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Known sender keys
    pub trust: Arc<TrustStore>,
    /// Judge-side vote persistence; enables media sync
    pub vote_store: Option<Arc<dyn VoteStore>>,
    /// Coordinator-side media destination; enables media receiving
    pub media_sink: Option<Arc<dyn MediaSink>>,
}

impl NodeParts {
    /// Parts over one radio that also hosts, with the system clock
    pub fn new<R>(radio: R, trust: Arc<TrustStore>) -> Self
    where
        R: BleTransport + RelayHosting + Clone + 'static,
    {
        Self {
            transport: Arc::new(radio.clone()),
            hosting: Arc::new(radio),
            clock: Arc::new(SystemClock),
            trust,
            vote_store: None,
            media_sink: None,
        }
    }

    /// Use `clock` instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a vote store
    #[must_use]
    pub fn with_vote_store(mut self, store: Arc<dyn VoteStore>) -> Self {
        self.vote_store = Some(store);
        self
    }

    /// Attach a media sink
    #[must_use]
    pub fn with_media_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.media_sink = Some(sink);
        self
    }
}

struct NodeInner {
    config: FireflyConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn BleTransport>,
    events: EventBus,
    validator: Arc<PacketValidator>,
    swarm: SwarmStateMachine,
    relay: Arc<RelayEngine>,
    media_sync: Option<Arc<MediaSyncEngine>>,
    vote_store: Option<Arc<dyn VoteStore>>,
    shutdown: CancellationToken,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A Firefly protocol node
#[derive(Clone)]
pub struct FireflyNode {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for FireflyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireflyNode")
            .field("node_id", &self.node_id())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl FireflyNode {
    /// Build a node. Deliveries (coordinator packets, catalogs) arrive on the
    /// returned receiver, which must be drained.
    ///
    /// # Errors
    ///
    /// Returns [`FireflyError::InvalidConfig`] if the configuration is inconsistent.
    pub fn new(
        config: FireflyConfig,
        parts: NodeParts,
    ) -> Result<(Self, mpsc::Receiver<Delivery>)> {
        config.validate()?;

        let events = EventBus::default();
        let shutdown = CancellationToken::new();

        let tracker = Arc::new(PacketTracker::new(
            config.tracker.clone(),
            Arc::clone(&parts.clock),
        ));
        let validator = Arc::new(PacketValidator::new(
            config.validator.clone(),
            tracker,
            parts.trust,
            Arc::clone(&parts.clock),
        ));
        let writer = Arc::new(FrameWriter::new(
            Arc::clone(&parts.transport),
            config.chunk,
        )?);

        let swarm = SwarmStateMachine::new(
            config.swarm.clone(),
            Arc::clone(&parts.transport),
            parts.hosting,
            Arc::clone(&parts.clock),
            events.clone(),
            shutdown.child_token(),
        );

        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let mut relay = RelayEngine::new(
            config.relay.clone(),
            Arc::clone(&writer),
            Arc::clone(&validator),
            swarm.clone(),
            events.clone(),
            Arc::clone(&parts.clock),
        )
        .with_deliveries(tx);

        let media_sync = parts.vote_store.as_ref().map(|store| {
            Arc::new(
                MediaSyncEngine::new(
                    config.media.clone(),
                    Arc::clone(&writer),
                    Arc::clone(store),
                    Arc::clone(&parts.clock),
                    events.clone(),
                )
                .with_swarm(swarm.clone()),
            )
        });
        if let Some(engine) = &media_sync {
            relay = relay.with_media_sync(Arc::clone(engine));
        }
        if let Some(sink) = parts.media_sink {
            relay = relay.with_media_receiver(Arc::new(MediaReceiver::new(Arc::clone(&writer), sink)));
        }

        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                clock: parts.clock,
                transport: parts.transport,
                events,
                validator,
                swarm,
                relay: Arc::new(relay),
                media_sync,
                vote_store: parts.vote_store,
                shutdown,
                running: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        Ok((node, rx))
    }

    /// Start the background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`FireflyError::InvalidState`] if the node is running or was
    /// already shut down.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(FireflyError::invalid_state("Node was shut down"));
        }
        if inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FireflyError::invalid_state("Node already running"));
        }

        let mut tasks = inner.tasks.lock().await;

        // Subscribe before spawning so no early frame is missed
        let notifications = inner.transport.notifications();
        let relay = Arc::clone(&inner.relay);
        let token = inner.shutdown.child_token();
        tasks.push(tokio::spawn(async move {
            relay.run(notifications, token).await;
        }));

        if !inner.config.relay.is_coordinator() {
            let swarm = inner.swarm.clone();
            tasks.push(tokio::spawn(async move { swarm.run().await }));
        }

        if let Some(engine) = &inner.media_sync {
            let engine = Arc::clone(engine);
            let token = inner.shutdown.child_token();
            tasks.push(tokio::spawn(async move { engine.run(token).await }));
        }

        tracing::info!(
            node_id = %inner.config.relay.node_id,
            coordinator = inner.config.relay.is_coordinator(),
            media_sync = inner.media_sync.is_some(),
            "Node started"
        );
        Ok(())
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// # Errors
    ///
    /// Returns [`FireflyError::InvalidState`] if the node is not running.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FireflyError::invalid_state("Node not running"));
        }

        inner.shutdown.cancel();
        let tasks: Vec<_> = inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Node task ended abnormally");
            }
        }

        tracing::info!(node_id = %inner.config.relay.node_id, "Node stopped");
        Ok(())
    }

    /// True between `start` and `shutdown`
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// This node's identifier
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.config.relay.node_id
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &FireflyConfig {
        &self.inner.config
    }

    /// Subscribe to engine events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FireflyEvent> {
        self.inner.events.subscribe()
    }

    /// Current swarm role
    #[must_use]
    pub fn swarm_state(&self) -> SwarmState {
        self.inner.swarm.state()
    }

    /// Swarm state machine
    #[must_use]
    pub fn swarm(&self) -> &SwarmStateMachine {
        &self.inner.swarm
    }

    /// Relay engine
    #[must_use]
    pub fn relay(&self) -> &Arc<RelayEngine> {
        &self.inner.relay
    }

    /// Media sync engine, if a vote store is attached
    #[must_use]
    pub fn media_sync(&self) -> Option<&Arc<MediaSyncEngine>> {
        self.inner.media_sync.as_ref()
    }

    /// Inbound validator
    #[must_use]
    pub fn validator(&self) -> &Arc<PacketValidator> {
        &self.inner.validator
    }

    /// Send an already built packet.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send_packet(&self, packet: &NodusPacket) -> Result<()> {
        self.inner.relay.send_packet(packet).await
    }

    /// Seal `plaintext` as a new packet from this node and send it.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or sending fails.
    pub async fn send_sealed(
        &self,
        packet_type: PacketType,
        plaintext: &[u8],
        key: &AeadKey,
        signer: &SigningKey,
    ) -> Result<NodusPacket> {
        let relay = &self.inner.config.relay;
        let packet = NodusPacket::seal(
            packet_type,
            &relay.node_id,
            self.inner.clock.unix_time(),
            plaintext,
            key,
            signer,
        )?
        .with_ttl(relay.initial_ttl);

        self.send_packet(&packet).await?;
        Ok(packet)
    }

    /// Persist a vote (when a store is attached) and send it as a sealed
    /// `Vote` packet.
    ///
    /// # Errors
    ///
    /// Returns an error if storing, sealing or sending fails.
    pub async fn author_vote(
        &self,
        vote: &Vote,
        key: &AeadKey,
        signer: &SigningKey,
    ) -> Result<NodusPacket> {
        if let Some(store) = &self.inner.vote_store {
            store
                .save_vote(vote.clone())
                .await
                .map_err(|e| SyncError::Storage(e.0))?;
        }
        let body = serde_json::to_vec(vote).map_err(|e| PacketError::Encode(e.to_string()))?;
        self.send_sealed(PacketType::Vote, &body, key, signer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::vote::{InMemoryMediaSink, InMemoryVoteStore, VoteId};
    use firefly_transport::LoopbackHub;
    use rand_core::OsRng;

    fn config(node_id: &str) -> FireflyConfig {
        FireflyConfig {
            relay: RelayConfig {
                node_id: node_id.into(),
                coordinator_id: Some("coord".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_node_start_stop() {
        let hub = LoopbackHub::new();
        let (node, _rx) =
            FireflyNode::new(config("judge"), NodeParts::new(hub.radio("judge"), Arc::default()))
                .unwrap();
        assert!(!node.is_running());

        node.start().await.unwrap();
        assert!(node.is_running());
        assert!(node.start().await.is_err());

        node.shutdown().await.unwrap();
        assert!(!node.is_running());
        assert!(node.shutdown().await.is_err());
        assert!(node.start().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let hub = LoopbackHub::new();
        let mut cfg = config("judge");
        cfg.relay.node_id.clear();
        assert!(matches!(
            FireflyNode::new(cfg, NodeParts::new(hub.radio("judge"), Arc::default())),
            Err(FireflyError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_reaches_coordinator() {
        let hub = LoopbackHub::new();
        hub.link("judge", "coord");
        let signer = SigningKey::generate(&mut OsRng);
        let key = AeadKey::generate(&mut OsRng);
        let trust = Arc::new(TrustStore::new());
        trust.insert("judge", signer.verifying_key());

        let store = Arc::new(InMemoryVoteStore::new());
        let (judge, _) = FireflyNode::new(
            config("judge"),
            NodeParts::new(hub.radio("judge"), Arc::clone(&trust)).with_vote_store(store.clone()),
        )
        .unwrap();
        let (coord, mut deliveries) =
            FireflyNode::new(config("coord"), NodeParts::new(hub.radio("coord"), trust)).unwrap();
        coord.start().await.unwrap();

        let vote = Vote::new("ev-1", "proj-7", "judge", serde_json::json!({"design": 9}));
        let sent = judge.author_vote(&vote, &key, &signer).await.unwrap();
        assert!(store.get(&vote.id).is_some());

        let Some(Delivery::Packet { peer, packet }) = deliveries.recv().await else {
            panic!("expected a packet delivery");
        };
        assert_eq!(peer, "judge");
        assert_eq!(packet.id, sent.id);
        let body: Vote = serde_json::from_slice(&packet.open(&key).unwrap()).unwrap();
        assert_eq!(body, vote);

        coord.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_sync_between_nodes() {
        let hub = LoopbackHub::new();
        hub.link("judge", "coord");
        hub.radio("judge").set_signal_strength(Some(-55));

        let store = Arc::new(InMemoryVoteStore::new());
        let vote = Vote::new("ev", "p", "judge", serde_json::Value::Null).with_media("img-1");
        store.insert_with_media(vote.clone(), vec![0x5A; 3000]);
        let sink = Arc::new(InMemoryMediaSink::new());

        let (judge, _) = FireflyNode::new(
            config("judge"),
            NodeParts::new(hub.radio("judge"), Arc::default()).with_vote_store(store.clone()),
        )
        .unwrap();
        let (coord, _) = FireflyNode::new(
            config("coord"),
            NodeParts::new(hub.radio("coord"), Arc::default()).with_media_sink(sink.clone()),
        )
        .unwrap();

        let mut events = judge.subscribe();
        coord.start().await.unwrap();
        judge.start().await.unwrap();

        loop {
            if let FireflyEvent::MediaDelivered { vote_id } = events.recv().await.unwrap() {
                assert_eq!(vote_id, vote.id.to_hex());
                break;
            }
        }
        assert_eq!(sink.get(&vote.id).unwrap().len(), 3000);
        assert!(store.get(&vote.id).unwrap().media_synced);
        assert!(sink.get(&VoteId::generate()).is_none());

        judge.shutdown().await.unwrap();
        coord.shutdown().await.unwrap();
    }
}
