//! Relay hosting capability.

use async_trait::async_trait;

use crate::transport::{TransportError, TransportResult};

/// Advertising as a relay so neighbours can connect upstream through us.
#[async_trait]
pub trait RelayHosting: Send + Sync {
    /// Whether the device can host at all.
    fn is_supported(&self) -> bool;

    /// Whether advertising is currently on.
    fn is_advertising(&self) -> bool;

    /// Begin advertising the Firefly service.
    ///
    /// # Errors
    /// Returns `TransportError::Unsupported` on devices that cannot host.
    async fn start_advertising(&self) -> TransportResult<()>;

    /// Stop advertising. Idempotent.
    ///
    /// # Errors
    /// Returns `TransportError` if the platform call fails.
    async fn stop_advertising(&self) -> TransportResult<()>;
}

/// Hosting stub for devices without peripheral support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRelayHosting;

#[async_trait]
impl RelayHosting for NoopRelayHosting {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_advertising(&self) -> bool {
        false
    }

    async fn start_advertising(&self) -> TransportResult<()> {
        Err(TransportError::Unsupported("relay hosting".into()))
    }

    async fn stop_advertising(&self) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_hosting() {
        let hosting = NoopRelayHosting;
        assert!(!hosting.is_supported());
        assert!(matches!(
            hosting.start_advertising().await,
            Err(TransportError::Unsupported(_))
        ));
        assert!(hosting.stop_advertising().await.is_ok());
        assert!(!hosting.is_advertising());
    }
}
