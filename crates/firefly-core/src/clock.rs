//! Injectable time source.
//!
//! Every timer in the engine goes through a [`Clock`] so tests can drive the
//! swarm and the media engine in virtual time. [`SystemClock`] follows tokio's
//! clock (and therefore honours `tokio::time::pause`); [`ManualClock`] only
//! moves when told to.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::oneshot;

/// Boxed sleep future returned by [`Clock::sleep`]
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Time source used by every timer in the engine.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic now
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch
    fn unix_time(&self) -> u64;

    /// Future completing after `duration`.
    ///
    /// The deadline is fixed when this is called, not when the future is
    /// first polled.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Production clock backed by tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct ManualInner {
    base: Instant,
    base_unix: u64,
    offset_nanos: AtomicU64,
    next_id: AtomicU64,
    sleepers: DashMap<u64, (u64, oneshot::Sender<()>)>,
}

/// Virtual clock advanced explicitly with [`ManualClock::advance`].
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

impl ManualClock {
    /// Clock starting at the current instant and a fixed Unix time
    #[must_use]
    pub fn new(unix_start: u64) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                base: Instant::now(),
                base_unix: unix_start,
                offset_nanos: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                sleepers: DashMap::new(),
            }),
        }
    }

    /// Virtual time elapsed since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.inner.offset_nanos.load(Ordering::Acquire))
    }

    /// Move time forward and wake every sleeper whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let now = self
            .inner
            .offset_nanos
            .fetch_add(step, Ordering::AcqRel)
            .saturating_add(step);
        self.wake_due(now);
    }

    /// Sleepers not yet woken
    #[must_use]
    pub fn pending_sleepers(&self) -> usize {
        self.inner.sleepers.len()
    }

    /// Yield until at least `n` sleepers are registered.
    pub async fn wait_for_sleepers(&self, n: usize) {
        while self.pending_sleepers() < n {
            tokio::task::yield_now().await;
        }
    }

    fn wake_due(&self, now: u64) {
        let due: Vec<u64> = self
            .inner
            .sleepers
            .iter()
            .filter(|entry| entry.value().0 <= now)
            .map(|entry| *entry.key())
            .collect();

        for id in due {
            if let Some((_, (_, tx))) = self.inner.sleepers.remove(&id) {
                let _ = tx.send(());
            }
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .field("sleepers", &self.pending_sleepers())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.base + self.elapsed()
    }

    fn unix_time(&self) -> u64 {
        self.inner.base_unix + self.elapsed().as_secs()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }

        let step = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let deadline = self
            .inner
            .offset_nanos
            .load(Ordering::Acquire)
            .saturating_add(step);

        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sleepers.insert(id, (deadline, tx));

        // advance() may have run between the load and the insert
        self.wake_due(self.inner.offset_nanos.load(Ordering::Acquire));

        Box::pin(async move {
            let _ = rx.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        let start = clock.now();

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!(clock.unix_time(), 1_090);
    }

    #[tokio::test]
    async fn test_manual_sleep_wakes_on_deadline() {
        let clock = ManualClock::default();
        let mut sleep = clock.sleep(Duration::from_secs(10));
        assert_eq!(clock.pending_sleepers(), 1);

        clock.advance(Duration::from_secs(9));
        assert!(futures_poll_once(&mut sleep).await.is_none());

        clock.advance(Duration::from_secs(1));
        sleep.await;
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[tokio::test]
    async fn test_zero_sleep_is_ready() {
        let clock = ManualClock::default();
        clock.sleep(Duration::ZERO).await;
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_paused_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(5)).await;
        assert!(clock.now() - start >= Duration::from_secs(5));
    }

    async fn futures_poll_once(sleep: &mut Sleep) -> Option<()> {
        tokio::select! {
            biased;
            () = sleep.as_mut() => Some(()),
            () = std::future::ready(()) => None,
        }
    }
}
