//! Engine event bus
//!
//! Observers (UI, logs, tests) subscribe to a broadcast of [`FireflyEvent`]s.
//! Emitting never blocks and never fails; events with no subscriber are
//! dropped.

use tokio::sync::broadcast;

use crate::swarm::SwarmState;

/// Default event channel capacity
pub const EVENT_CAPACITY: usize = 256;

/// Security event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventType {
    /// Signature missing or invalid
    AuthenticationFailed,

    /// Mandatory verification for a sender with no registered key
    UnknownSender,
}

/// Events raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireflyEvent {
    /// Swarm role changed
    SwarmStateChanged {
        /// Previous state
        from: SwarmState,
        /// New state
        to: SwarmState,
    },

    /// Mule mode toggled
    MuleModeChanged {
        /// Whether mule mode is now on
        active: bool,
    },

    /// Circuit opened; media sync passes are skipped
    SyncPaused,

    /// Circuit closed again after a successful delivery
    SyncResumed,

    /// Media acknowledged by the coordinator
    MediaDelivered {
        /// Hex vote id
        vote_id: String,
    },

    /// Media delivery gave up after all retries
    MediaFailed {
        /// Hex vote id
        vote_id: String,
        /// Final error
        reason: String,
    },

    /// Authentication failure worth auditing
    SecurityAlert {
        /// Event type
        event_type: SecurityEventType,
        /// Claimed sender
        sender: String,
        /// Peer that delivered the packet
        peer: String,
    },

    /// Inbound packet dropped
    PacketDropped {
        /// Packet id when it could be decoded
        packet_id: Option<String>,
        /// Short drop reason
        reason: &'static str,
    },
}

/// Cloneable handle for emitting and subscribing to events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FireflyEvent>,
}

impl EventBus {
    /// Create a bus with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: FireflyEvent) {
        tracing::trace!(?event, "Event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FireflyEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}
