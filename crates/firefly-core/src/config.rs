//! Engine configuration
//!
//! Every threshold the protocol uses lives here with its documented default.
//! Components take their section at construction.

use std::time::Duration;

pub use firefly_chunk::ChunkConfig;

pub use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig};
use crate::error::{FireflyError, Result};

/// Maximum relay hops a packet may take
pub const DEFAULT_TTL: u8 = 2;

/// Complete engine configuration
#[derive(Debug, Clone, Default)]
pub struct FireflyConfig {
    /// Replay cache configuration
    pub tracker: TrackerConfig,

    /// Inbound packet validation
    pub validator: ValidatorConfig,

    /// Chunk framing
    pub chunk: ChunkConfig,

    /// Swarm role election
    pub swarm: SwarmConfig,

    /// Relay identity and forwarding
    pub relay: RelayConfig,

    /// Media delivery
    pub media: MediaSyncConfig,
}

impl FireflyConfig {
    /// Check the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns [`FireflyError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.relay.node_id.trim().is_empty() {
            return Err(FireflyError::invalid_config("node id must not be empty"));
        }
        if self.relay.initial_ttl == 0 {
            return Err(FireflyError::invalid_config("initial ttl must be positive"));
        }
        if self.relay.media_forward_window.is_zero() {
            return Err(FireflyError::invalid_config("media forward window must be positive"));
        }
        if self.relay.media_forward_window > self.media.ack_timeout {
            return Err(FireflyError::invalid_config(
                "media forward window must not exceed the ACK timeout",
            ));
        }
        if self.relay.reassembly_timeout.is_zero() {
            return Err(FireflyError::invalid_config("reassembly timeout must be positive"));
        }
        if self.tracker.max_entries == 0 {
            return Err(FireflyError::invalid_config("tracker capacity must be positive"));
        }
        if self.tracker.retention.is_zero() {
            return Err(FireflyError::invalid_config("tracker retention must be positive"));
        }
        if self.chunk.mtu < firefly_chunk::MIN_MTU {
            return Err(FireflyError::InvalidConfig(
                format!(
                    "mtu {} is below the minimum of {}",
                    self.chunk.mtu,
                    firefly_chunk::MIN_MTU
                )
                .into(),
            ));
        }
        if self.chunk.mtu > firefly_transport::BLE_MTU {
            return Err(FireflyError::invalid_config("mtu exceeds the transport write size"));
        }

        let swarm = &self.swarm;
        if swarm.candidate_wait_min > swarm.candidate_wait_max {
            return Err(FireflyError::invalid_config("candidate wait window is empty"));
        }
        if swarm.heartbeat.is_zero() {
            return Err(FireflyError::invalid_config("heartbeat must be positive"));
        }
        if swarm.redundancy_k == 0 {
            return Err(FireflyError::invalid_config("redundancy threshold must be positive"));
        }

        let media = &self.media;
        if media.poll_interval.is_zero() {
            return Err(FireflyError::invalid_config("media poll interval must be positive"));
        }
        if media.ack_timeout.is_zero() {
            return Err(FireflyError::invalid_config("ack timeout must be positive"));
        }
        if media.retry.max_attempts == 0 {
            return Err(FireflyError::invalid_config("retry attempts must be positive"));
        }
        if media.breaker.failure_threshold == 0 || media.breaker.success_threshold == 0 {
            return Err(FireflyError::invalid_config("breaker thresholds must be positive"));
        }
        if media.rssi_threshold < swarm.promotion_rssi {
            tracing::warn!(
                media = media.rssi_threshold,
                promotion = swarm.promotion_rssi,
                "Media sync threshold is weaker than the relay promotion gate"
            );
        }

        Ok(())
    }
}

/// Replay/loop cache configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a seen packet id is remembered
    pub retention: Duration,

    /// Entry bound; the cache is cleared when it is reached
    pub max_entries: usize,

    /// Purge expired entries every this many inserts
    pub purge_interval: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(10 * 60),
            max_entries: 10_000,
            purge_interval: 256,
        }
    }
}

/// Inbound packet validation
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Require a valid signature from a known sender on every packet type
    pub strict: bool,

    /// Oldest accepted packet
    pub max_age: Duration,

    /// Furthest accepted future timestamp
    pub max_future_skew: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict: true,
            max_age: Duration::from_secs(2 * 60 * 60),
            max_future_skew: Duration::from_secs(5 * 60),
        }
    }
}

/// Swarm role election
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Interval between state machine ticks
    pub heartbeat: Duration,

    /// Signal must be strictly above this (dBm) to become a candidate
    pub promotion_rssi: i16,

    /// Shortest candidate backoff
    pub candidate_wait_min: Duration,

    /// Longest candidate backoff
    pub candidate_wait_max: Duration,

    /// Stay a seeker if at least this many neighbours already relay
    pub redundancy_k: usize,

    /// Longest continuous time spent relaying
    pub max_link_duration: Duration,

    /// Rest period after relaying
    pub cooldown: Duration,

    /// Coordinator silence that turns on mule mode
    pub mule_threshold: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(5),
            promotion_rssi: -75,
            candidate_wait_min: Duration::from_secs(5),
            candidate_wait_max: Duration::from_secs(30),
            redundancy_k: 2,
            max_link_duration: Duration::from_secs(60),
            cooldown: Duration::from_secs(5 * 60),
            mule_threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// Relay identity and forwarding
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// This node's identifier, appended to `hops` when relaying
    pub node_id: String,

    /// Coordinator identifier; contact with it keeps mule mode off
    pub coordinator_id: Option<String>,

    /// TTL stamped on packets this node authors
    pub initial_ttl: u8,

    /// Media or ACK for a vote already forwarded inside this window is not
    /// forwarded again. Must not exceed the media ACK timeout, so retries
    /// pass through.
    pub media_forward_window: Duration,

    /// Partial reassembly state from a silent peer is discarded after this
    pub reassembly_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_id: "firefly-node".to_string(),
            coordinator_id: None,
            initial_ttl: DEFAULT_TTL,
            media_forward_window: Duration::from_secs(10),
            reassembly_timeout: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// True when this node is the coordinator
    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.coordinator_id.as_deref() == Some(self.node_id.as_str())
    }
}

/// Media delivery
#[derive(Debug, Clone)]
pub struct MediaSyncConfig {
    /// Interval between signal polls
    pub poll_interval: Duration,

    /// Signal must be strictly above this (dBm) to start a sync pass
    pub rssi_threshold: i16,

    /// Relaxed threshold used while in mule mode
    pub mule_rssi_threshold: i16,

    /// Wait for an ACK after the last chunk
    pub ack_timeout: Duration,

    /// Per-item retry policy
    pub retry: RetryConfig,

    /// Breaker across items
    pub breaker: CircuitBreakerConfig,
}

impl Default for MediaSyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            rssi_threshold: -70,
            mule_rssi_threshold: -75,
            ack_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}
