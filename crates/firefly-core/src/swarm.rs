//! Swarm role election.
//!
//! Each node runs this state machine on a heartbeat. A node with a strong
//! link becomes a candidate, backs off for a random interval (trickle), then
//! either stands down because enough neighbours already relay or starts
//! relaying itself. Relaying is time-boxed and followed by a cooldown.
//!
//! ```text
//!   Seeker ──strong signal──▶ Candidate ──wait, < k relays──▶ Link
//!     ▲                          │                              │
//!     │◀──────── ≥ k relays ─────┘                    max link time
//!     │                                                         ▼
//!     └──────────────────── cooldown elapsed ─────────────── Cooldown
//! ```
//!
//! Mule mode is tracked alongside: it turns on when the coordinator has not
//! been heard from for a while and never changes the swarm state itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use firefly_transport::{BleTransport, RelayHosting};
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::SwarmConfig;
use crate::events::{EventBus, FireflyEvent};

/// Swarm role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwarmState {
    /// Looking for a strong link
    Seeker,
    /// Waiting out the trickle backoff
    Candidate,
    /// Relaying for neighbours
    Link,
    /// Resting after relaying
    Cooldown,
}

impl fmt::Display for SwarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwarmState::Seeker => "seeker",
            SwarmState::Candidate => "candidate",
            SwarmState::Link => "link",
            SwarmState::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

const NEVER: u64 = u64::MAX;

struct SwarmInner {
    config: SwarmConfig,
    transport: Arc<dyn BleTransport>,
    hosting: Arc<dyn RelayHosting>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    cancel: CancellationToken,
    state_tx: watch::Sender<SwarmState>,
    promotion_in_flight: AtomicBool,
    mule_mode: AtomicBool,
    // Millisecond offsets from `epoch`
    epoch: Instant,
    state_entered: AtomicU64,
    last_contact: AtomicU64,
}

/// Resets the single-flight flag when the promotion task ends, however it ends
struct PromotionGuard(Arc<SwarmInner>);

impl Drop for PromotionGuard {
    fn drop(&mut self) {
        self.0.promotion_in_flight.store(false, Ordering::Release);
    }
}

/// Heartbeat-driven relay election
#[derive(Clone)]
pub struct SwarmStateMachine {
    inner: Arc<SwarmInner>,
}

impl fmt::Debug for SwarmStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmStateMachine")
            .field("state", &self.state())
            .field("mule_mode", &self.is_mule_mode())
            .finish()
    }
}

impl SwarmStateMachine {
    /// Create a state machine in `Seeker`.
    ///
    /// The coordinator counts as just contacted, so mule mode stays off for
    /// one full threshold after start-up.
    pub fn new(
        config: SwarmConfig,
        transport: Arc<dyn BleTransport>,
        hosting: Arc<dyn RelayHosting>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(SwarmState::Seeker);
        let epoch = clock.now();
        Self {
            inner: Arc::new(SwarmInner {
                config,
                transport,
                hosting,
                clock,
                events,
                cancel,
                state_tx,
                promotion_in_flight: AtomicBool::new(false),
                mule_mode: AtomicBool::new(false),
                epoch,
                state_entered: AtomicU64::new(0),
                last_contact: AtomicU64::new(0),
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SwarmState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SwarmState> {
        self.inner.state_tx.subscribe()
    }

    /// True while relaying
    #[must_use]
    pub fn is_relaying(&self) -> bool {
        self.state() == SwarmState::Link
    }

    /// True once the coordinator has been silent past the threshold
    #[must_use]
    pub fn is_mule_mode(&self) -> bool {
        self.inner.mule_mode.load(Ordering::Acquire)
    }

    /// True while a candidate backoff is running
    #[must_use]
    pub fn is_promotion_in_flight(&self) -> bool {
        self.inner.promotion_in_flight.load(Ordering::Acquire)
    }

    /// Record confirmed contact with the coordinator.
    pub fn record_coordinator_contact(&self) {
        let now = self.inner.offset_millis();
        self.inner.last_contact.store(now, Ordering::Release);
        self.inner.update_mule_mode();
    }

    /// Run one heartbeat.
    ///
    /// The candidate backoff is spawned, so a tick never blocks on it.
    pub async fn tick(&self) {
        self.inner.update_mule_mode();

        match self.state() {
            SwarmState::Seeker => self.try_promote(),
            SwarmState::Candidate => {}
            SwarmState::Link => {
                if self.inner.time_in_state() > self.inner.config.max_link_duration {
                    if let Err(e) = self.inner.hosting.stop_advertising().await {
                        tracing::warn!(error = %e, "Failed to stop advertising");
                    }
                    self.inner.set_state(SwarmState::Cooldown);
                }
            }
            SwarmState::Cooldown => {
                if self.inner.time_in_state() >= self.inner.config.cooldown {
                    self.inner.set_state(SwarmState::Seeker);
                }
            }
        }
    }

    /// Tick every heartbeat until cancelled, then stop relaying.
    pub async fn run(&self) {
        let cancel = self.inner.cancel.clone();
        tracing::debug!(heartbeat = ?self.inner.config.heartbeat, "Swarm heartbeat started");

        loop {
            self.tick().await;
            let sleep = self.inner.clock.sleep(self.inner.config.heartbeat);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep => {}
            }
        }

        if self.inner.hosting.is_advertising() {
            if let Err(e) = self.inner.hosting.stop_advertising().await {
                tracing::warn!(error = %e, "Failed to stop advertising on shutdown");
            }
        }
        tracing::debug!("Swarm heartbeat stopped");
    }

    fn try_promote(&self) {
        let inner = &self.inner;
        if !inner.transport.is_connected() {
            return;
        }
        let Some(rssi) = inner.transport.last_signal_strength() else {
            return;
        };
        if rssi <= inner.config.promotion_rssi {
            return;
        }
        if inner
            .promotion_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let guard = PromotionGuard(Arc::clone(inner));
        let wait = inner.draw_candidate_wait();
        // Deadline is fixed now, before the task first runs
        let sleep = inner.clock.sleep(wait);
        inner.set_state(SwarmState::Candidate);
        tracing::debug!(rssi, wait = ?wait, "Candidate backoff started");

        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                () = task_inner.cancel.cancelled() => {
                    task_inner.set_state(SwarmState::Seeker);
                }
                () = sleep => task_inner.finish_candidate().await,
            }
        });
    }
}

impl SwarmInner {
    fn offset_millis(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.epoch);
        u64::try_from(elapsed.as_millis()).unwrap_or(NEVER - 1)
    }

    fn since(&self, mark: &AtomicU64) -> Duration {
        let then = mark.load(Ordering::Acquire);
        Duration::from_millis(self.offset_millis().saturating_sub(then))
    }

    fn time_in_state(&self) -> Duration {
        self.since(&self.state_entered)
    }

    fn set_state(&self, to: SwarmState) {
        self.state_entered.store(self.offset_millis(), Ordering::Release);
        let from = self.state_tx.send_replace(to);
        if from != to {
            tracing::info!(%from, %to, "Swarm state changed");
            self.events.emit(FireflyEvent::SwarmStateChanged { from, to });
        }
    }

    fn update_mule_mode(&self) {
        let active = self.since(&self.last_contact) > self.config.mule_threshold;
        if self.mule_mode.swap(active, Ordering::AcqRel) != active {
            if active {
                tracing::info!("Coordinator silent, entering mule mode");
            } else {
                tracing::info!("Coordinator contact restored, leaving mule mode");
            }
            self.events.emit(FireflyEvent::MuleModeChanged { active });
        }
    }

    fn draw_candidate_wait(&self) -> Duration {
        let min = self.config.candidate_wait_min;
        let max = self.config.candidate_wait_max;
        if max <= min {
            return min;
        }
        let span = u64::try_from((max - min).as_millis()).unwrap_or(u64::MAX);
        min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
    }

    async fn finish_candidate(&self) {
        if *self.state_tx.borrow() != SwarmState::Candidate {
            return;
        }

        let relays = self.transport.neighbor_link_count();
        if relays >= self.config.redundancy_k {
            tracing::debug!(relays, k = self.config.redundancy_k, "Enough relays nearby, standing down");
            self.set_state(SwarmState::Seeker);
            return;
        }

        match self.hosting.start_advertising().await {
            Ok(()) => self.set_state(SwarmState::Link),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot host relay, back to seeking");
                self.set_state(SwarmState::Seeker);
            }
        }
    }
}
