//! Inbound packet validation.
//!
//! Order matters: decode, replay check, timestamp window, signature. The
//! replay cache marks an id as seen before the later checks run, so a packet
//! rejected for its timestamp or signature is not re-examined when it comes
//! round again. Nothing here decrypts.

use std::sync::Arc;

use firefly_crypto::Signature;

use crate::clock::Clock;
use crate::config::ValidatorConfig;
use crate::error::ValidationError;
use crate::packet::NodusPacket;
use crate::tracker::PacketTracker;
use crate::trust::TrustStore;

/// Accepts or rejects raw inbound packets
#[derive(Debug)]
pub struct PacketValidator {
    config: ValidatorConfig,
    tracker: Arc<PacketTracker>,
    trust: Arc<TrustStore>,
    clock: Arc<dyn Clock>,
}

impl PacketValidator {
    /// Create a validator over a shared tracker and trust store
    pub fn new(
        config: ValidatorConfig,
        tracker: Arc<PacketTracker>,
        trust: Arc<TrustStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            tracker,
            trust,
            clock,
        }
    }

    /// Shared replay cache
    #[must_use]
    pub fn tracker(&self) -> &Arc<PacketTracker> {
        &self.tracker
    }

    /// Shared trust store
    #[must_use]
    pub fn trust(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    /// Decode `bytes` and run every acceptance check.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] hit, in check order.
    pub fn validate_and_parse(&self, bytes: &[u8]) -> Result<NodusPacket, ValidationError> {
        let packet = NodusPacket::decode(bytes)?;

        if !self.tracker.try_process(&packet.id) {
            return Err(ValidationError::Replay(packet.id));
        }

        self.check_timestamp(&packet)?;
        self.check_signature(&packet)?;

        Ok(packet)
    }

    fn check_timestamp(&self, packet: &NodusPacket) -> Result<(), ValidationError> {
        let now = self.clock.unix_time();

        if packet.timestamp > now {
            let skew_secs = packet.timestamp - now;
            if skew_secs > self.config.max_future_skew.as_secs() {
                return Err(ValidationError::FutureTimestamp { skew_secs });
            }
        } else {
            let age_secs = now - packet.timestamp;
            if age_secs > self.config.max_age.as_secs() {
                return Err(ValidationError::StaleTimestamp { age_secs });
            }
        }
        Ok(())
    }

    fn check_signature(&self, packet: &NodusPacket) -> Result<(), ValidationError> {
        let mandatory = self.config.strict || packet.packet_type.requires_signature();

        let Some(key) = self.trust.get(&packet.sender_id) else {
            if mandatory {
                return Err(ValidationError::UnknownSender(packet.sender_id.clone()));
            }
            tracing::debug!(
                sender = %packet.sender_id,
                packet_type = ?packet.packet_type,
                "Accepting unverified bootstrap packet"
            );
            return Ok(());
        };

        let authentic = Signature::from_slice(&packet.signature)
            .is_ok_and(|sig| key.verify(&packet.signable_bytes(), &sig).is_ok());

        if authentic {
            Ok(())
        } else {
            Err(ValidationError::Authentication {
                sender: packet.sender_id.clone(),
            })
        }
    }
}
