//! In-process relay simulation.
//!
//! Builds a chain over the loopback radio:
//!
//! ```text
//! judge ── relay-1 ── ... ── relay-N ── coord
//! ```
//!
//! The judge cannot host, so only the middle of the chain relays.
//!
//! Time is virtual. The swarm heartbeats run against a manual clock that the
//! simulation advances until every relay has promoted itself, then the judge
//! sends its votes and the coordinator's deliveries are reported.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use firefly_core::clock::Clock;
use firefly_core::{
    Delivery, FireflyConfig, FireflyNode, InMemoryVoteStore, ManualClock, NodeParts, SwarmState,
    TrustStore, Vote,
};
use firefly_crypto::{AeadKey, SigningKey};
use firefly_transport::{BleTransport, LoopbackHub, NoopRelayHosting};
use rand_core::OsRng;

const JUDGE: &str = "judge";
const COORDINATOR: &str = "coord";
const SIM_RSSI: i16 = -60;
const MAX_STEPS: usize = 600;
const DELIVERY_WAIT: Duration = Duration::from_secs(2);

fn node_config(base: &FireflyConfig, node_id: &str) -> FireflyConfig {
    let mut config = base.clone();
    config.relay.node_id = node_id.to_string();
    config.relay.coordinator_id = Some(COORDINATOR.to_string());
    // Chain nodes have two neighbours at most
    config.swarm.redundancy_k = config.swarm.redundancy_k.max(3);
    config
}

/// Run the simulation and print what reached the coordinator
pub async fn run(config: &crate::config::Config, relays: usize, votes: usize) -> anyhow::Result<()> {
    if relays == 0 {
        anyhow::bail!("Need at least one relay");
    }
    let base = config.to_firefly_config()?;

    let hub = LoopbackHub::new();
    let clock = ManualClock::default();
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());

    let signer = SigningKey::generate(&mut OsRng);
    let payload_key = AeadKey::generate(&mut OsRng);
    let trust = Arc::new(TrustStore::new());
    trust.insert(JUDGE, signer.verifying_key());

    let mut chain = vec![JUDGE.to_string()];
    chain.extend((1..=relays).map(|i| format!("relay-{i}")));
    chain.push(COORDINATOR.to_string());
    for pair in chain.windows(2) {
        hub.link(&pair[0], &pair[1]);
    }

    let mut nodes = Vec::with_capacity(chain.len());
    let mut deliveries = None;
    for id in &chain {
        let radio = hub.radio(id);
        radio.set_signal_strength(Some(SIM_RSSI));
        let mut parts =
            NodeParts::new(radio, Arc::clone(&trust)).with_clock(Arc::clone(&clock_arc));
        if id == JUDGE {
            parts = parts.with_vote_store(Arc::new(InMemoryVoteStore::new()));
            parts.hosting = Arc::new(NoopRelayHosting);
        }
        let (node, rx) = FireflyNode::new(node_config(&base, id), parts)?;
        node.start().await?;
        if id == COORDINATOR {
            deliveries = Some(rx);
        }
        nodes.push(node);
    }
    let mut deliveries = deliveries.context("coordinator missing")?;
    let relay_nodes = &nodes[1..=relays];

    println!("Chain: {}", chain.join(" -> "));

    // Advance virtual time until every relay advertises
    let mut steps = 0;
    while !relay_nodes
        .iter()
        .all(|n| n.swarm_state() == SwarmState::Link)
    {
        if steps == MAX_STEPS {
            anyhow::bail!("Relays did not promote within {MAX_STEPS} virtual seconds");
        }
        clock.advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2)).await;
        steps += 1;
    }
    println!("Relays promoted after {steps}s of virtual time");

    let judge = &nodes[0];
    for n in 0..votes {
        let vote = Vote::new(
            "sim-event",
            format!("project-{n}"),
            JUDGE,
            serde_json::json!({ "score": n }),
        );
        let packet = judge.author_vote(&vote, &payload_key, &signer).await?;
        tracing::debug!(packet_id = %packet.id, "Vote sent");
    }

    let mut delivered = 0;
    while delivered < votes {
        match tokio::time::timeout(DELIVERY_WAIT, deliveries.recv()).await {
            Ok(Some(Delivery::Packet { peer, packet })) => {
                delivered += 1;
                println!(
                    "Delivered {} from {} via [{}] ttl={}",
                    packet.id,
                    peer,
                    packet.hops.join(", "),
                    packet.ttl
                );
            }
            Ok(Some(Delivery::Catalog { .. })) => {}
            Ok(None) | Err(_) => break,
        }
    }

    println!("Votes delivered: {delivered}/{votes}");
    if delivered < votes {
        println!(
            "Hop budget is {} relay(s); longer chains drop packets once ttl reaches zero",
            base.relay.initial_ttl
        );
    }
    for (id, node) in chain.iter().zip(&nodes) {
        let stats = hub.radio(id).stats();
        println!(
            "  {id:<10} state={:<9} frames_sent={:<4} frames_received={}",
            node.swarm_state().to_string(),
            stats.frames_sent,
            stats.frames_received
        );
    }

    for node in &nodes {
        node.shutdown().await?;
    }
    Ok(())
}
