//! Registry of known sender keys.

use dashmap::DashMap;
use firefly_crypto::VerifyingKey;

/// Concurrent `senderId → public key` map consulted by the validator
#[derive(Debug, Default)]
pub struct TrustStore {
    keys: DashMap<String, VerifyingKey>,
}

impl TrustStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a sender's key. Returns the previous key, if any.
    pub fn insert(&self, sender_id: impl Into<String>, key: VerifyingKey) -> Option<VerifyingKey> {
        let sender_id = sender_id.into();
        let previous = self.keys.insert(sender_id.clone(), key);
        if previous.is_some_and(|old| old != key) {
            tracing::info!(sender = %sender_id, "Sender key replaced");
        }
        previous
    }

    /// Key registered for `sender_id`
    #[must_use]
    pub fn get(&self, sender_id: &str) -> Option<VerifyingKey> {
        self.keys.get(sender_id).map(|k| *k)
    }

    /// Forget a sender
    pub fn remove(&self, sender_id: &str) -> Option<VerifyingKey> {
        self.keys.remove(sender_id).map(|(_, k)| k)
    }

    /// Number of known senders
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no sender is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firefly_crypto::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn test_insert_get_remove() {
        let store = TrustStore::new();
        let key = SigningKey::generate(&mut OsRng).verifying_key();

        assert!(store.get("judge-1").is_none());
        assert!(store.insert("judge-1", key).is_none());
        assert_eq!(store.get("judge-1"), Some(key));
        assert_eq!(store.len(), 1);

        let replacement = SigningKey::generate(&mut OsRng).verifying_key();
        assert_eq!(store.insert("judge-1", replacement), Some(key));
        assert_eq!(store.get("judge-1"), Some(replacement));

        assert_eq!(store.remove("judge-1"), Some(replacement));
        assert!(store.is_empty());
    }
}
