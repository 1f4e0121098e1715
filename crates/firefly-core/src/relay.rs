//! Inbound dispatch and multi-hop forwarding.
//!
//! Frames from each peer are reassembled independently, then dispatched on
//! the payload tag:
//!
//! | Tag    | Handling                                                        |
//! |--------|-----------------------------------------------------------------|
//! | `0x01` | validate; deliver on the coordinator, forward while relaying    |
//! | `0x02` | store on the coordinator, forward once per window while relaying|
//! | `0x03` | deliver the catalog to the application                          |
//! | `0xA1` | resolve a pending media delivery, else forward while relaying   |
//!
//! Packet forwarding touches only `ttl` and `hops`. Media and ACK payloads
//! carry no hop budget, so each relay forwards a given vote's media or ACK
//! at most once per `media_forward_window`. Drops are silent on the wire and
//! reported as [`FireflyEvent::PacketDropped`].

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use firefly_chunk::Assembler;
use firefly_transport::InboundFrame;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{RelayConfig, TrackerConfig};
use crate::error::{Result, ValidationError};
use crate::events::{EventBus, FireflyEvent, SecurityEventType};
use crate::media_receiver::MediaReceiver;
use crate::media_sync::{ACK_LEN, MediaSyncEngine};
use crate::packet::{NodusPacket, TAG_ACK, TAG_CATALOG, TAG_MEDIA, TAG_PACKET};
use crate::swarm::SwarmStateMachine;
use crate::tracker::PacketTracker;
use crate::validator::PacketValidator;
use crate::vote::VoteId;
use crate::writer::FrameWriter;

/// Why a payload was dropped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Hop budget used up
    TtlExhausted,
    /// This node already relayed the packet
    Loop,
    /// Valid packet, but this node is not a relay right now
    NotRelaying,
    /// Frames did not reassemble
    Framing,
    /// Zero-length payload
    Empty,
    /// Payload tag not recognised
    UnknownTag(u8),
    /// No component here handles this payload kind
    Unhandled,
    /// Media receiver refused the payload
    MediaRejected,
    /// Forward write failed
    WriteFailed,
    /// Media or ACK already forwarded inside the window
    Duplicate,
}

impl DropReason {
    /// Short machine-readable form
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TtlExhausted => "ttl-exhausted",
            DropReason::Loop => "loop",
            DropReason::NotRelaying => "not-relaying",
            DropReason::Framing => "framing",
            DropReason::Empty => "empty",
            DropReason::UnknownTag(_) => "unknown-tag",
            DropReason::Unhandled => "unhandled",
            DropReason::MediaRejected => "media-rejected",
            DropReason::WriteFailed => "write-failed",
            DropReason::Duplicate => "duplicate",
        }
    }
}

/// Payload handed to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Validated packet that reached the coordinator
    Packet {
        /// Peer that delivered it
        peer: String,
        /// The packet, still encrypted
        packet: NodusPacket,
    },
    /// Catalog payload, tag stripped
    Catalog {
        /// Peer that delivered it
        peer: String,
        /// Catalog bytes
        payload: Vec<u8>,
    },
}

/// Result of handling one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// More frames expected
    Incomplete,
    /// Packet delivered locally
    Delivered,
    /// Packet forwarded upstream
    Forwarded {
        /// Packet id
        packet_id: String,
        /// TTL after this hop
        ttl: u8,
    },
    /// Payload dropped
    Dropped(DropReason),
    /// Packet rejected by validation
    Rejected(ValidationError),
    /// ACK processed
    AckHandled {
        /// Whether it matched an awaited delivery
        matched: bool,
    },
    /// Media stored and acknowledged
    MediaReceived(VoteId),
    /// Media or ACK passed on toward its destination
    MediaForwarded {
        /// Payload tag, `TAG_MEDIA` or `TAG_ACK`
        tag: u8,
        /// Vote the payload belongs to
        vote_id: VoteId,
    },
    /// Catalog handed to the application
    Catalog,
}

/// Apply one relay hop in place.
///
/// # Errors
///
/// Returns [`DropReason::TtlExhausted`] if `ttl` is zero, or
/// [`DropReason::Loop`] if `node_id` is already in the hop trace. The packet
/// is left untouched in both cases.
pub fn apply_hop(packet: &mut NodusPacket, node_id: &str) -> std::result::Result<(), DropReason> {
    if packet.ttl == 0 {
        return Err(DropReason::TtlExhausted);
    }
    if packet.has_visited(node_id) {
        return Err(DropReason::Loop);
    }
    packet.ttl -= 1;
    packet.hops.push(node_id.to_string());
    Ok(())
}

struct PeerStream {
    assembler: Assembler,
    last_frame: Instant,
}

/// Reassembles, validates, delivers and forwards inbound traffic
pub struct RelayEngine {
    config: RelayConfig,
    writer: Arc<FrameWriter>,
    validator: Arc<PacketValidator>,
    swarm: SwarmStateMachine,
    events: EventBus,
    clock: Arc<dyn Clock>,
    media_sync: Option<Arc<MediaSyncEngine>>,
    media_receiver: Option<Arc<MediaReceiver>>,
    deliveries: Option<mpsc::Sender<Delivery>>,
    // Only peers with a transfer in progress
    streams: DashMap<String, PeerStream>,
    forwarded_media: PacketTracker,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("node_id", &self.config.node_id)
            .field("peers", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl RelayEngine {
    /// Create an engine with no media handling and no delivery channel
    pub fn new(
        config: RelayConfig,
        writer: Arc<FrameWriter>,
        validator: Arc<PacketValidator>,
        swarm: SwarmStateMachine,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let forwarded_media = PacketTracker::new(
            TrackerConfig {
                retention: config.media_forward_window,
                max_entries: 1024,
                purge_interval: 64,
            },
            Arc::clone(&clock),
        );
        Self {
            config,
            writer,
            validator,
            swarm,
            events,
            clock,
            media_sync: None,
            media_receiver: None,
            deliveries: None,
            streams: DashMap::new(),
            forwarded_media,
        }
    }

    /// Route ACKs to a media sync engine
    #[must_use]
    pub fn with_media_sync(mut self, engine: Arc<MediaSyncEngine>) -> Self {
        self.media_sync = Some(engine);
        self
    }

    /// Accept media payloads
    #[must_use]
    pub fn with_media_receiver(mut self, receiver: Arc<MediaReceiver>) -> Self {
        self.media_receiver = Some(receiver);
        self
    }

    /// Send delivered packets and catalogs to `tx`
    #[must_use]
    pub fn with_deliveries(mut self, tx: mpsc::Sender<Delivery>) -> Self {
        self.deliveries = Some(tx);
        self
    }

    /// This node's identifier
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Peers with a transfer in progress
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.streams.len()
    }

    /// Send a packet this node authored (or otherwise originates).
    ///
    /// The id is marked seen first, so the packet is not relayed back to us.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send_packet(&self, packet: &NodusPacket) -> Result<()> {
        self.validator.tracker().try_process(&packet.id);
        let wire = packet.encode()?;
        self.writer.send(&wire).await?;
        tracing::debug!(packet_id = %packet.id, ttl = packet.ttl, "Packet sent");
        Ok(())
    }

    /// Feed one inbound frame.
    ///
    /// Reassembly state is kept only while a transfer is in progress. State
    /// left by a peer that went silent mid-transfer is dropped after
    /// `reassembly_timeout`.
    pub async fn handle_frame(&self, frame: &InboundFrame) -> RelayOutcome {
        let now = self.clock.now();
        if !self.streams.contains_key(&frame.peer) {
            self.evict_stale(now);
        }

        // Guard must not live across the await below
        let pushed = {
            let mut stream = self
                .streams
                .entry(frame.peer.clone())
                .or_insert_with(|| PeerStream {
                    assembler: Assembler::new(),
                    last_frame: now,
                });
            stream.last_frame = now;
            stream.assembler.push(&frame.data)
        };
        self.streams
            .remove_if(&frame.peer, |_, stream| !stream.assembler.is_receiving());

        match pushed {
            Ok(None) => RelayOutcome::Incomplete,
            Ok(Some(payload)) => self.handle_payload(&frame.peer, payload).await,
            Err(e) => {
                tracing::debug!(peer = %frame.peer, error = %e, "Frame rejected");
                self.dropped(None, DropReason::Framing)
            }
        }
    }

    /// Dispatch one reassembled payload.
    pub async fn handle_payload(&self, peer: &str, payload: Vec<u8>) -> RelayOutcome {
        let Some(&tag) = payload.first() else {
            return self.dropped(None, DropReason::Empty);
        };

        match tag {
            TAG_PACKET => self.handle_packet(peer, &payload).await,
            TAG_ACK => self.handle_ack(peer, &payload).await,
            TAG_MEDIA => match &self.media_receiver {
                Some(receiver) => match receiver.handle_media(&payload).await {
                    Ok(id) => RelayOutcome::MediaReceived(id),
                    Err(e) => {
                        tracing::warn!(peer, error = %e, "Media payload rejected");
                        self.dropped(None, DropReason::MediaRejected)
                    }
                },
                None if self.forwards_media() => self.forward_media(peer, &payload).await,
                None => {
                    tracing::trace!(peer, "Media not for this node");
                    self.dropped(None, DropReason::Unhandled)
                }
            },
            TAG_CATALOG => {
                let delivery = Delivery::Catalog {
                    peer: peer.to_string(),
                    payload: payload[1..].to_vec(),
                };
                self.deliver(delivery).await;
                RelayOutcome::Catalog
            }
            other => {
                tracing::debug!(peer, tag = other, "Unknown payload tag");
                self.dropped(None, DropReason::UnknownTag(other))
            }
        }
    }

    async fn handle_ack(&self, peer: &str, payload: &[u8]) -> RelayOutcome {
        if let Some(engine) = &self.media_sync {
            if engine.handle_ack(payload) {
                return RelayOutcome::AckHandled { matched: true };
            }
        }
        if self.forwards_media() {
            return self.forward_media(peer, payload).await;
        }
        match &self.media_sync {
            Some(_) => RelayOutcome::AckHandled { matched: false },
            None => self.dropped(None, DropReason::Unhandled),
        }
    }

    fn forwards_media(&self) -> bool {
        !self.config.is_coordinator() && self.swarm.is_relaying()
    }

    /// Pass a media or ACK payload on unchanged, once per vote per window.
    async fn forward_media(&self, peer: &str, payload: &[u8]) -> RelayOutcome {
        let Some(vote_id) = payload.get(1..ACK_LEN).and_then(VoteId::from_slice) else {
            return self.dropped(None, DropReason::MediaRejected);
        };
        let tag = payload[0];
        if !self
            .forwarded_media
            .try_process(&format!("{tag:02x}:{}", vote_id.to_hex()))
        {
            return self.dropped(None, DropReason::Duplicate);
        }

        match self.writer.send(payload).await {
            Ok(_) => {
                tracing::debug!(peer, tag, vote_id = %vote_id, "Media payload forwarded");
                RelayOutcome::MediaForwarded { tag, vote_id }
            }
            Err(e) => {
                tracing::warn!(peer, vote_id = %vote_id, error = %e, "Media forward failed");
                self.dropped(None, DropReason::WriteFailed)
            }
        }
    }

    fn evict_stale(&self, now: Instant) {
        let timeout = self.config.reassembly_timeout;
        self.streams.retain(|peer, stream| {
            let fresh = now.saturating_duration_since(stream.last_frame) < timeout;
            if !fresh {
                tracing::debug!(peer = %peer, "Discarding stale partial transfer");
            }
            fresh
        });
    }

    async fn handle_packet(&self, peer: &str, payload: &[u8]) -> RelayOutcome {
        let mut packet = match self.validator.validate_and_parse(payload) {
            Ok(packet) => packet,
            Err(e) => return self.rejected(peer, e),
        };

        if self.config.coordinator_id.as_deref() == Some(packet.sender_id.as_str()) {
            self.swarm.record_coordinator_contact();
        }

        if self.config.is_coordinator() {
            tracing::debug!(packet_id = %packet.id, hops = packet.hops.len(), "Packet delivered");
            self.deliver(Delivery::Packet {
                peer: peer.to_string(),
                packet,
            })
            .await;
            return RelayOutcome::Delivered;
        }

        if !self.swarm.is_relaying() {
            return self.dropped(Some(packet.id), DropReason::NotRelaying);
        }

        if let Err(reason) = apply_hop(&mut packet, &self.config.node_id) {
            return self.dropped(Some(packet.id), reason);
        }

        let forwarded = match packet.encode() {
            Ok(wire) => self.writer.send(&wire).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match forwarded {
            Ok(_) => {
                tracing::debug!(packet_id = %packet.id, ttl = packet.ttl, "Packet forwarded");
                RelayOutcome::Forwarded {
                    packet_id: packet.id,
                    ttl: packet.ttl,
                }
            }
            Err(e) => {
                tracing::warn!(packet_id = %packet.id, error = %e, "Forward failed");
                self.dropped(Some(packet.id), DropReason::WriteFailed)
            }
        }
    }

    fn rejected(&self, peer: &str, err: ValidationError) -> RelayOutcome {
        let security_event = match &err {
            ValidationError::Authentication { sender } => {
                Some((SecurityEventType::AuthenticationFailed, sender.clone()))
            }
            ValidationError::UnknownSender(sender) => {
                Some((SecurityEventType::UnknownSender, sender.clone()))
            }
            _ => None,
        };

        if let Some((event_type, sender)) = security_event {
            tracing::warn!(peer, sender = %sender, error = %err, "Packet failed authentication");
            self.events.emit(FireflyEvent::SecurityAlert {
                event_type,
                sender,
                peer: peer.to_string(),
            });
        } else {
            tracing::debug!(peer, error = %err, "Packet rejected");
        }

        let packet_id = match &err {
            ValidationError::Replay(id) => Some(id.clone()),
            _ => None,
        };
        self.events.emit(FireflyEvent::PacketDropped {
            packet_id,
            reason: err.reason(),
        });
        RelayOutcome::Rejected(err)
    }

    fn dropped(&self, packet_id: Option<String>, reason: DropReason) -> RelayOutcome {
        tracing::trace!(packet_id = ?packet_id, reason = reason.as_str(), "Payload dropped");
        self.events.emit(FireflyEvent::PacketDropped {
            packet_id,
            reason: reason.as_str(),
        });
        RelayOutcome::Dropped(reason)
    }

    async fn deliver(&self, delivery: Delivery) {
        let Some(tx) = &self.deliveries else {
            return;
        };
        if tx.send(delivery).await.is_err() {
            tracing::debug!("Delivery receiver gone");
        }
    }

    /// Process inbound frames until cancelled or the transport closes.
    ///
    /// Takes the receiver so callers can subscribe before spawning.
    pub async fn run(
        &self,
        mut notifications: broadcast::Receiver<InboundFrame>,
        cancel: CancellationToken,
    ) {
        tracing::debug!(node_id = %self.config.node_id, "Relay loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = notifications.recv() => match received {
                    Ok(frame) => {
                        self.handle_frame(&frame).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Partial transfers are now missing frames
                        tracing::warn!(skipped, "Inbound frames lost, resetting reassembly");
                        self.streams.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!(node_id = %self.config.node_id, "Relay loop stopped");
    }
}
