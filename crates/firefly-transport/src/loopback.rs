//! In-process loopback radio.
//!
//! A [`LoopbackHub`] stands in for the air between nodes. Each node gets a
//! [`LoopbackRadio`] implementing both [`BleTransport`] and [`RelayHosting`].
//! Links are undirected; a write reaches every peer currently linked to the
//! writer, which matches a node holding one GATT connection per neighbour.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, watch};

use crate::hosting::RelayHosting;
use crate::transport::{BleTransport, InboundFrame, TransportError, TransportResult, TransportStats};
use crate::{BLE_MTU, NOTIFICATION_CAPACITY};

const NO_SIGNAL: i32 = i32::MIN;

struct RadioState {
    inbound: broadcast::Sender<InboundFrame>,
    connected: watch::Sender<bool>,
    links: DashSet<String>,
    signal: AtomicI32,
    advertising: AtomicBool,
    hosting_supported: AtomicBool,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
}

impl RadioState {
    fn new() -> Self {
        let (inbound, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (connected, _) = watch::channel(false);
        Self {
            inbound,
            connected,
            links: DashSet::new(),
            signal: AtomicI32::new(NO_SIGNAL),
            advertising: AtomicBool::new(false),
            hosting_supported: AtomicBool::new(true),
            fail_all: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        }
    }

    fn refresh_connected(&self) {
        let up = !self.links.is_empty();
        self.connected.send_if_modified(|current| {
            let changed = *current != up;
            *current = up;
            changed
        });
    }

    fn take_injected_failure(&self) -> bool {
        if self.fail_all.load(Ordering::Acquire) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

type Registry = Arc<DashMap<String, Arc<RadioState>>>;

/// Shared medium connecting loopback radios.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    radios: Registry,
}

impl LoopbackHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the radio for `id`
    #[must_use]
    pub fn radio(&self, id: &str) -> LoopbackRadio {
        let state = self
            .radios
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RadioState::new()))
            .clone();
        LoopbackRadio {
            id: id.to_string(),
            state,
            radios: Arc::clone(&self.radios),
        }
    }

    /// Link two radios in both directions.
    pub fn link(&self, a: &str, b: &str) {
        let ra = self.radio(a);
        let rb = self.radio(b);
        ra.state.links.insert(b.to_string());
        rb.state.links.insert(a.to_string());
        ra.state.refresh_connected();
        rb.state.refresh_connected();
        tracing::trace!(a, b, "Loopback link up");
    }

    /// Remove the link between two radios.
    pub fn unlink(&self, a: &str, b: &str) {
        let ra = self.radio(a);
        let rb = self.radio(b);
        ra.state.links.remove(b);
        rb.state.links.remove(a);
        ra.state.refresh_connected();
        rb.state.refresh_connected();
        tracing::trace!(a, b, "Loopback link down");
    }

    /// Number of radios on the hub
    #[must_use]
    pub fn len(&self) -> usize {
        self.radios.len()
    }

    /// True if no radio has been created
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.radios.is_empty()
    }
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackHub")
            .field("radios", &self.radios.len())
            .finish()
    }
}

/// One node's endpoint on a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackRadio {
    id: String,
    state: Arc<RadioState>,
    radios: Registry,
}

impl LoopbackRadio {
    /// Node identifier this radio belongs to
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the RSSI reported by [`BleTransport::last_signal_strength`]
    pub fn set_signal_strength(&self, rssi: Option<i16>) {
        let raw = rssi.map_or(NO_SIGNAL, i32::from);
        self.state.signal.store(raw, Ordering::Release);
    }

    /// Make every write fail until cleared
    pub fn set_write_failure(&self, fail: bool) {
        self.state.fail_all.store(fail, Ordering::Release);
    }

    /// Fail the next `n` writes, then recover
    pub fn fail_next_writes(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::Release);
    }

    /// Toggle peripheral support reported by [`RelayHosting::is_supported`]
    pub fn set_hosting_supported(&self, supported: bool) {
        self.state.hosting_supported.store(supported, Ordering::Release);
    }

    /// Write attempts, successful or not
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.state.frames_sent.load(Ordering::Acquire)
            + self.state.send_errors.load(Ordering::Acquire)
    }

    /// Identifiers of currently linked peers
    #[must_use]
    pub fn linked_peers(&self) -> Vec<String> {
        self.state.links.iter().map(|p| p.key().clone()).collect()
    }
}

impl std::fmt::Debug for LoopbackRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackRadio")
            .field("id", &self.id)
            .field("links", &self.state.links.len())
            .finish()
    }
}

#[async_trait]
impl BleTransport for LoopbackRadio {
    fn is_connected(&self) -> bool {
        *self.state.connected.borrow()
    }

    fn last_signal_strength(&self) -> Option<i16> {
        let raw = self.state.signal.load(Ordering::Acquire);
        if raw == NO_SIGNAL {
            None
        } else {
            i16::try_from(raw).ok()
        }
    }

    fn neighbor_link_count(&self) -> usize {
        self.state
            .links
            .iter()
            .filter(|peer| {
                self.radios
                    .get(peer.key())
                    .is_some_and(|r| r.advertising.load(Ordering::Acquire))
            })
            .count()
    }

    async fn write_raw(&self, data: &[u8]) -> TransportResult<()> {
        if data.len() > BLE_MTU {
            self.state.send_errors.fetch_add(1, Ordering::AcqRel);
            return Err(TransportError::FrameTooLarge {
                len: data.len(),
                mtu: BLE_MTU,
            });
        }
        if !self.is_connected() {
            self.state.send_errors.fetch_add(1, Ordering::AcqRel);
            return Err(TransportError::NotConnected);
        }
        if self.state.take_injected_failure() {
            self.state.send_errors.fetch_add(1, Ordering::AcqRel);
            return Err(TransportError::WriteFailed("injected failure".into()));
        }

        let peers: Vec<Arc<RadioState>> = self
            .state
            .links
            .iter()
            .filter_map(|peer| self.radios.get(peer.key()).map(|r| Arc::clone(r.value())))
            .collect();

        for peer in peers {
            peer.bytes_received
                .fetch_add(data.len() as u64, Ordering::AcqRel);
            peer.frames_received.fetch_add(1, Ordering::AcqRel);
            // No subscriber means nobody is listening on that node yet
            let _ = peer.inbound.send(InboundFrame {
                peer: self.id.clone(),
                data: data.to_vec(),
            });
        }

        self.state
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::AcqRel);
        self.state.frames_sent.fetch_add(1, Ordering::AcqRel);

        tokio::task::yield_now().await;
        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<InboundFrame> {
        self.state.inbound.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.state.connected.subscribe()
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.state.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.state.bytes_received.load(Ordering::Acquire),
            frames_sent: self.state.frames_sent.load(Ordering::Acquire),
            frames_received: self.state.frames_received.load(Ordering::Acquire),
            send_errors: self.state.send_errors.load(Ordering::Acquire),
        }
    }
}

#[async_trait]
impl RelayHosting for LoopbackRadio {
    fn is_supported(&self) -> bool {
        self.state.hosting_supported.load(Ordering::Acquire)
    }

    fn is_advertising(&self) -> bool {
        self.state.advertising.load(Ordering::Acquire)
    }

    async fn start_advertising(&self) -> TransportResult<()> {
        if !self.is_supported() {
            return Err(TransportError::Unsupported("relay hosting".into()));
        }
        self.state.advertising.store(true, Ordering::Release);
        tracing::debug!(node = %self.id, "Advertising as relay");
        Ok(())
    }

    async fn stop_advertising(&self) -> TransportResult<()> {
        if self.state.advertising.swap(false, Ordering::AcqRel) {
            tracing::debug!(node = %self.id, "Stopped advertising");
        }
        Ok(())
    }
}
