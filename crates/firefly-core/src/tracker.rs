//! Replay and loop prevention cache.
//!
//! Remembers every packet id for a retention window. The first sighting of an
//! id wins; later sightings inside the window are rejected. The cache is
//! bounded: reaching the bound clears it outright.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::Clock;
use crate::config::TrackerConfig;

/// Concurrent packet id → expiry cache
pub struct PacketTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, Instant>,
    inserts: AtomicU64,
}

impl std::fmt::Debug for PacketTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTracker")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}

impl PacketTracker {
    /// Create an empty tracker
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            inserts: AtomicU64::new(0),
        }
    }

    /// Record `id` and report whether this is its first sighting.
    ///
    /// Returns `true` for a new or expired id and `false` for one seen inside
    /// the retention window. Check and insert are atomic per id.
    pub fn try_process(&self, id: &str) -> bool {
        let now = self.clock.now();

        // No entry guard may be held across these whole-map operations
        if self.entries.len() >= self.config.max_entries {
            self.purge_expired(now);
            if self.entries.len() >= self.config.max_entries {
                tracing::warn!(
                    max_entries = self.config.max_entries,
                    "Packet tracker full, clearing"
                );
                self.entries.clear();
            }
        }

        let expiry = now + self.config.retention;
        let fresh = match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut seen) => {
                if *seen.get() > now {
                    false
                } else {
                    seen.insert(expiry);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expiry);
                true
            }
        };

        if fresh {
            let count = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.purge_interval > 0 && count % self.config.purge_interval == 0 {
                self.purge_expired(now);
            }
        }

        fresh
    }

    /// True if `id` is remembered and unexpired
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.entries.get(id).is_some_and(|expiry| *expiry > now)
    }

    /// Number of remembered ids, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is remembered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn purge_expired(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::trace!(purged, "Purged expired packet ids");
        }
    }
}
