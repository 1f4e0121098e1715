//! # Firefly Transport
//!
//! Radio transport layer for the Firefly protocol.
//!
//! This crate provides:
//! - The [`BleTransport`] trait the protocol engine writes frames through
//! - The [`RelayHosting`] capability used while a node is an active relay
//! - Fixed GATT identifiers and the per-write MTU
//! - [`LoopbackHub`], an in-process radio for tests and simulation
//!
//! The real GATT stack lives outside this workspace; it only has to implement
//! the two traits.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod hosting;
pub mod loopback;
pub mod transport;

pub use hosting::{NoopRelayHosting, RelayHosting};
pub use loopback::{LoopbackHub, LoopbackRadio};
pub use transport::{BleTransport, InboundFrame, TransportError, TransportResult, TransportStats};

/// GATT service advertised by every Firefly node
pub const SERVICE_UUID: &str = "6e400001-f1f1-4e0a-9b1f-1f5e5f1a0001";

/// Read/write/notify characteristic carrying all frames
pub const CHARACTERISTIC_UUID: &str = "6e400002-f1f1-4e0a-9b1f-1f5e5f1a0001";

/// Bytes per transport write
pub const BLE_MTU: usize = 180;

/// Capacity of each radio's inbound notification channel
pub const NOTIFICATION_CAPACITY: usize = 1024;
