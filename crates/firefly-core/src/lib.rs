//! # Firefly Core
//!
//! Protocol engine for Firefly, a self-organizing relay protocol that carries
//! small signed, encrypted records from handheld nodes to one coordinator over
//! a short-range radio link.
//!
//! This crate provides:
//! - Swarm role election (Seeker / Candidate / Link / Cooldown) and mule mode
//! - The `NodusPacket` envelope, replay cache and inbound validator
//! - Multi-hop relaying under TTL and hop-trace rules
//! - Media delivery with acknowledgement, retry and circuit breaking
//! - Node orchestration over any [`BleTransport`](firefly_transport::BleTransport)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         FireflyNode                             │
//! │     (swarm heartbeat, relay loop, media poller, shutdown)       │
//! ├────────────────────────────┬────────────────────────────────────┤
//! │        RelayEngine         │         MediaSyncEngine            │
//! │ (reassembly, validation,   │  (chunked media, ACK wait, retry,  │
//! │  delivery, forwarding)     │   circuit breaker)                 │
//! ├────────────────────────────┴────────────────────────────────────┤
//! │                        FrameWriter                              │
//! │        (one chunked payload at a time on the radio)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod media_receiver;
pub mod media_sync;
pub mod node;
pub mod packet;
pub mod relay;
pub mod swarm;
pub mod tracker;
pub mod trust;
pub mod validator;
pub mod vote;
pub mod writer;

pub use circuit_breaker::{CircuitBreaker, CircuitMetrics, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ChunkConfig, CircuitBreakerConfig, DEFAULT_TTL, FireflyConfig, MediaSyncConfig, RelayConfig,
    RetryConfig, SwarmConfig, TrackerConfig, ValidatorConfig,
};
pub use error::{FireflyError, PacketError, Result, SyncError, ValidationError};
pub use events::{EventBus, FireflyEvent, SecurityEventType};
pub use media_receiver::MediaReceiver;
pub use media_sync::{MediaSyncEngine, SyncReport};
pub use node::{FireflyNode, NodeParts};
pub use packet::{NodusPacket, PacketType, TAG_ACK, TAG_CATALOG, TAG_MEDIA, TAG_PACKET};
pub use relay::{Delivery, DropReason, RelayEngine, RelayOutcome, apply_hop};
pub use swarm::{SwarmState, SwarmStateMachine};
pub use tracker::PacketTracker;
pub use trust::TrustStore;
pub use validator::PacketValidator;
pub use vote::{
    InMemoryMediaSink, InMemoryVoteStore, MediaSink, StorageError, SyncStatus, Vote, VoteId,
    VoteStore,
};
pub use writer::FrameWriter;
