//! Circuit breaker and retry policy for media delivery
//!
//! Tracks consecutive delivery failures toward the coordinator and opens the
//! circuit once a threshold is reached, so a dead or unreachable coordinator
//! does not drain the battery with doomed writes. Recovery is probed through
//! the half-open state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

use crate::clock::Clock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - deliveries pass through normally
    Closed,

    /// Circuit is open - sync passes are skipped without writing
    Open,

    /// Circuit is half-open - testing if the coordinator recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Duration to wait before transitioning from Open to HalfOpen
    pub open_duration: Duration,

    /// Number of successful deliveries in HalfOpen before closing circuit
    pub success_threshold: u32,

    /// Reset failure count after successful delivery
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            success_threshold: 1,
            reset_on_success: true,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_transition: Instant,
    last_failure: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    open_count: u64,
}

impl Circuit {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_transition: now,
            last_failure: None,
            total_failures: 0,
            total_successes: 0,
            open_count: 0,
        }
    }

    fn try_transition_to_half_open(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        if self.state == CircuitState::Open
            && now.saturating_duration_since(self.last_transition) >= config.open_duration
        {
            self.state = CircuitState::HalfOpen;
            self.success_count = 0;
            self.last_transition = now;
        }
    }

    fn record_success(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        self.total_successes += 1;

        match self.state {
            CircuitState::Closed => {
                if config.reset_on_success {
                    self.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.last_transition = now;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        self.total_failures += 1;
        self.last_failure = Some(now);

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.open(now);
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                // Probe failed
                self.failure_count = config.failure_threshold;
                self.open(now);
                true
            }
            CircuitState::Open => false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.last_transition = now;
        self.open_count += 1;
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    /// Current state
    pub state: CircuitState,

    /// Consecutive failures
    pub failure_count: u32,

    /// Total failures
    pub total_failures: u64,

    /// Total successes
    pub total_successes: u64,

    /// Times circuit opened
    pub open_count: u64,

    /// Last failure time
    pub last_failure: Option<Instant>,
}

/// Circuit breaker guarding delivery to the coordinator
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuit: Mutex<Circuit>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            circuit: Mutex::new(Circuit::new(now)),
        }
    }

    /// Check if a delivery attempt is allowed
    pub async fn allows_request(&self) -> bool {
        let now = self.clock.now();
        let mut circuit = self.circuit.lock().await;
        circuit.try_transition_to_half_open(&self.config, now);
        circuit.state != CircuitState::Open
    }

    /// Record a successful delivery
    pub async fn record_success(&self) {
        let now = self.clock.now();
        self.circuit.lock().await.record_success(&self.config, now);
    }

    /// Record a failed delivery. Returns true if this failure opened the circuit.
    pub async fn record_failure(&self) -> bool {
        let now = self.clock.now();
        let opened = self.circuit.lock().await.record_failure(&self.config, now);
        if opened {
            tracing::warn!(
                threshold = self.config.failure_threshold,
                open_for = ?self.config.open_duration,
                "Circuit opened after consecutive delivery failures"
            );
        }
        opened
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.circuit.lock().await.state
    }

    /// Current metrics
    pub async fn metrics(&self) -> CircuitMetrics {
        let c = self.circuit.lock().await;
        CircuitMetrics {
            state: c.state,
            failure_count: c.failure_count,
            total_failures: c.total_failures,
            total_successes: c.total_successes,
            open_count: c.open_count,
            last_failure: c.last_failure,
        }
    }

    /// Force the circuit closed
    pub async fn reset(&self) {
        let now = self.clock.now();
        let mut circuit = self.circuit.lock().await;
        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
        circuit.success_count = 0;
        circuit.last_transition = now;
    }
}

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per item, first try included
    pub max_attempts: u32,

    /// Backoff before the second attempt
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Backoff to wait after failed attempt number `attempt` (0-based)
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let millis = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.0..0.25);
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}
