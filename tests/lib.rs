//! Shared fixtures for the Firefly integration tests.
//!
//! Builds linear chains of real nodes over the loopback radio:
//!
//! ```text
//! judge ── relay-1 ── ... ── relay-N ── coord
//! ```

use std::sync::Arc;
use std::time::Duration;

use firefly_core::{
    Delivery, FireflyConfig, FireflyNode, InMemoryMediaSink, InMemoryVoteStore, NodeParts,
    RelayConfig, SwarmConfig, SwarmState, TrustStore,
};
use firefly_crypto::{AeadKey, SigningKey};
use firefly_transport::{LoopbackHub, NoopRelayHosting};
use rand_core::OsRng;
use tokio::sync::mpsc;

/// Author at the head of every chain
pub const JUDGE: &str = "judge";

/// Coordinator at the tail of every chain
pub const COORDINATOR: &str = "coord";

/// Signal strength reported by every radio in a chain
pub const CHAIN_RSSI: i16 = -60;

/// Node configuration that promotes on the first heartbeat.
///
/// Chain nodes see two neighbours at most, so the redundancy threshold is
/// raised to keep a neighbouring relay from suppressing promotion.
#[must_use]
pub fn node_config(node_id: &str) -> FireflyConfig {
    FireflyConfig {
        relay: RelayConfig {
            node_id: node_id.into(),
            coordinator_id: Some(COORDINATOR.into()),
            ..Default::default()
        },
        swarm: SwarmConfig {
            candidate_wait_min: Duration::ZERO,
            candidate_wait_max: Duration::ZERO,
            redundancy_k: 3,
            max_link_duration: Duration::from_secs(3600),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A running chain of nodes
pub struct Chain {
    /// Loopback medium shared by every node
    pub hub: LoopbackHub,
    /// Node ids, head to tail
    pub ids: Vec<String>,
    /// Nodes in the same order as `ids`
    pub nodes: Vec<FireflyNode>,
    /// Deliveries made by the coordinator
    pub deliveries: mpsc::Receiver<Delivery>,
    /// Key trusted for the judge
    pub signer: SigningKey,
    /// Shared payload key
    pub payload_key: AeadKey,
    /// Judge's vote store
    pub store: Arc<InMemoryVoteStore>,
    /// Coordinator's media sink
    pub sink: Arc<InMemoryMediaSink>,
}

impl Chain {
    /// Build and start a chain with `relays` nodes between judge and coordinator.
    ///
    /// # Panics
    ///
    /// Panics if a node fails to build or start.
    pub async fn start(relays: usize) -> Self {
        let hub = LoopbackHub::new();
        let signer = SigningKey::generate(&mut OsRng);
        let trust = Arc::new(TrustStore::new());
        trust.insert(JUDGE, signer.verifying_key());
        let store = Arc::new(InMemoryVoteStore::new());
        let sink = Arc::new(InMemoryMediaSink::new());

        let mut ids = vec![JUDGE.to_string()];
        ids.extend((1..=relays).map(|i| format!("relay-{i}")));
        ids.push(COORDINATOR.to_string());
        for pair in ids.windows(2) {
            hub.link(&pair[0], &pair[1]);
        }

        let mut nodes = Vec::with_capacity(ids.len());
        let mut deliveries = None;
        for id in &ids {
            let radio = hub.radio(id);
            radio.set_signal_strength(Some(CHAIN_RSSI));
            let mut parts = NodeParts::new(radio, Arc::clone(&trust));
            if id == JUDGE {
                parts = parts.with_vote_store(store.clone());
                parts.hosting = Arc::new(NoopRelayHosting);
            }
            if id == COORDINATOR {
                parts = parts.with_media_sink(sink.clone());
            }
            let (node, rx) = FireflyNode::new(node_config(id), parts).unwrap();
            node.start().await.unwrap();
            if id == COORDINATOR {
                deliveries = Some(rx);
            }
            nodes.push(node);
        }

        Self {
            hub,
            ids,
            nodes,
            deliveries: deliveries.unwrap(),
            signer,
            payload_key: AeadKey::generate(&mut OsRng),
            store,
            sink,
        }
    }

    /// The authoring node
    #[must_use]
    pub fn judge(&self) -> &FireflyNode {
        &self.nodes[0]
    }

    /// Node by id
    ///
    /// # Panics
    ///
    /// Panics if no node has that id.
    #[must_use]
    pub fn node(&self, id: &str) -> &FireflyNode {
        let index = self.ids.iter().position(|n| n == id).unwrap();
        &self.nodes[index]
    }

    /// Nodes between the judge and the coordinator
    #[must_use]
    pub fn relays(&self) -> &[FireflyNode] {
        &self.nodes[1..self.nodes.len() - 1]
    }

    /// Wait until every relay advertises.
    ///
    /// # Panics
    ///
    /// Panics if a relay's swarm stops before reaching `Link`.
    pub async fn wait_for_links(&self) {
        for relay in self.relays() {
            let mut state = relay.swarm().subscribe();
            state.wait_for(|s| *s == SwarmState::Link).await.unwrap();
        }
    }

    /// Stop every node.
    ///
    /// # Panics
    ///
    /// Panics if a node was already stopped.
    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown().await.unwrap();
        }
    }
}
