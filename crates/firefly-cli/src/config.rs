//! Configuration file for the Firefly CLI.
//!
//! The file is TOML. Every field has a default, so a partial file is fine.
//! Durations are plain integers with the unit in the key name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use firefly_core::{
    ChunkConfig, CircuitBreakerConfig, FireflyConfig, MediaSyncConfig, RelayConfig, RetryConfig,
    SwarmConfig, TrackerConfig, TrustStore, ValidatorConfig,
};
use firefly_crypto::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Firefly configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity
    #[serde(default)]
    pub node: NodeSection,
    /// Radio framing
    #[serde(default)]
    pub transport: TransportSection,
    /// Relay election
    #[serde(default)]
    pub swarm: SwarmSection,
    /// Inbound validation
    #[serde(default)]
    pub validator: ValidatorSection,
    /// Replay cache
    #[serde(default)]
    pub tracker: TrackerSection,
    /// Media delivery
    #[serde(default)]
    pub media: MediaSection,
    /// Known senders: id -> hex Ed25519 public key
    #[serde(default)]
    pub trust: BTreeMap<String, String>,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This node's identifier
    pub node_id: String,
    /// Coordinator identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<String>,
    /// Hex Ed25519 seed file
    pub signing_key_file: PathBuf,
    /// Hex AES-256 payload key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_key: Option<String>,
    /// TTL for authored packets
    pub initial_ttl: u8,
}

/// Radio framing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Bytes per write
    pub mtu: usize,
}

/// Relay election
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmSection {
    /// Heartbeat interval
    pub heartbeat_secs: u64,
    /// Promotion gate (dBm)
    pub promotion_rssi: i16,
    /// Shortest candidate backoff
    pub candidate_wait_min_secs: u64,
    /// Longest candidate backoff
    pub candidate_wait_max_secs: u64,
    /// Relays nearby that suppress promotion
    pub redundancy_k: usize,
    /// Longest relaying stint
    pub max_link_secs: u64,
    /// Rest after relaying
    pub cooldown_secs: u64,
    /// Coordinator silence before mule mode
    pub mule_threshold_secs: u64,
}

/// Inbound validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSection {
    /// Require signatures on every packet type
    pub strict: bool,
    /// Oldest accepted packet
    pub max_age_secs: u64,
    /// Furthest accepted future timestamp
    pub max_future_skew_secs: u64,
}

/// Replay cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// Retention window
    pub retention_secs: u64,
    /// Entry bound
    pub max_entries: usize,
}

/// Media delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    /// Signal poll interval
    pub poll_interval_ms: u64,
    /// Sync gate (dBm)
    pub rssi_threshold: i16,
    /// Sync gate in mule mode (dBm)
    pub mule_rssi_threshold: i16,
    /// ACK wait
    pub ack_timeout_secs: u64,
    /// Attempts per item
    pub max_attempts: u32,
    /// First retry backoff
    pub initial_backoff_ms: u64,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open
    pub open_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
}

fn secs(d: Duration) -> u64 {
    d.as_secs()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for NodeSection {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            node_id: relay.node_id,
            coordinator_id: None,
            signing_key_file: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("firefly/signing_key"),
            payload_key: None,
            initial_ttl: relay.initial_ttl,
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            mtu: ChunkConfig::default().mtu,
        }
    }
}

impl Default for SwarmSection {
    fn default() -> Self {
        let d = SwarmConfig::default();
        Self {
            heartbeat_secs: secs(d.heartbeat),
            promotion_rssi: d.promotion_rssi,
            candidate_wait_min_secs: secs(d.candidate_wait_min),
            candidate_wait_max_secs: secs(d.candidate_wait_max),
            redundancy_k: d.redundancy_k,
            max_link_secs: secs(d.max_link_duration),
            cooldown_secs: secs(d.cooldown),
            mule_threshold_secs: secs(d.mule_threshold),
        }
    }
}

impl Default for ValidatorSection {
    fn default() -> Self {
        let d = ValidatorConfig::default();
        Self {
            strict: d.strict,
            max_age_secs: secs(d.max_age),
            max_future_skew_secs: secs(d.max_future_skew),
        }
    }
}

impl Default for TrackerSection {
    fn default() -> Self {
        let d = TrackerConfig::default();
        Self {
            retention_secs: secs(d.retention),
            max_entries: d.max_entries,
        }
    }
}

impl Default for MediaSection {
    fn default() -> Self {
        let d = MediaSyncConfig::default();
        Self {
            poll_interval_ms: millis(d.poll_interval),
            rssi_threshold: d.rssi_threshold,
            mule_rssi_threshold: d.mule_rssi_threshold,
            ack_timeout_secs: secs(d.ack_timeout),
            max_attempts: d.retry.max_attempts,
            initial_backoff_ms: millis(d.retry.initial_backoff),
            failure_threshold: d.breaker.failure_threshold,
            open_secs: secs(d.breaker.open_duration),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("firefly/config.toml")
    }

    /// Load from `path`; at the default path a missing file is created with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the file fails.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        if path == Self::default_path() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }
        anyhow::bail!("Config file not found: {}", path.display())
    }

    /// Convert to the engine configuration and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log level is unknown or the engine rejects
    /// the values.
    pub fn to_firefly_config(&self) -> anyhow::Result<FireflyConfig> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        let s = &self.swarm;
        let m = &self.media;
        let config = FireflyConfig {
            tracker: TrackerConfig {
                retention: Duration::from_secs(self.tracker.retention_secs),
                max_entries: self.tracker.max_entries,
                ..Default::default()
            },
            validator: ValidatorConfig {
                strict: self.validator.strict,
                max_age: Duration::from_secs(self.validator.max_age_secs),
                max_future_skew: Duration::from_secs(self.validator.max_future_skew_secs),
            },
            chunk: ChunkConfig {
                mtu: self.transport.mtu,
            },
            swarm: SwarmConfig {
                heartbeat: Duration::from_secs(s.heartbeat_secs),
                promotion_rssi: s.promotion_rssi,
                candidate_wait_min: Duration::from_secs(s.candidate_wait_min_secs),
                candidate_wait_max: Duration::from_secs(s.candidate_wait_max_secs),
                redundancy_k: s.redundancy_k,
                max_link_duration: Duration::from_secs(s.max_link_secs),
                cooldown: Duration::from_secs(s.cooldown_secs),
                mule_threshold: Duration::from_secs(s.mule_threshold_secs),
            },
            relay: RelayConfig {
                node_id: self.node.node_id.clone(),
                coordinator_id: self.node.coordinator_id.clone(),
                initial_ttl: self.node.initial_ttl,
                media_forward_window: Duration::from_secs(m.ack_timeout_secs),
                ..Default::default()
            },
            media: MediaSyncConfig {
                poll_interval: Duration::from_millis(m.poll_interval_ms),
                rssi_threshold: m.rssi_threshold,
                mule_rssi_threshold: m.mule_rssi_threshold,
                ack_timeout: Duration::from_secs(m.ack_timeout_secs),
                retry: RetryConfig {
                    max_attempts: m.max_attempts,
                    initial_backoff: Duration::from_millis(m.initial_backoff_ms),
                    ..Default::default()
                },
                breaker: CircuitBreakerConfig {
                    failure_threshold: m.failure_threshold,
                    open_duration: Duration::from_secs(m.open_secs),
                    ..Default::default()
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the trust store from the `[trust]` table.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry that is not a valid key.
    pub fn trust_store(&self) -> anyhow::Result<TrustStore> {
        let trust = TrustStore::new();
        for (sender, key_hex) in &self.trust {
            let key = VerifyingKey::from_hex(key_hex)
                .map_err(|e| anyhow::anyhow!("Trust entry '{sender}' is not a valid key: {e}"))?;
            trust.insert(sender.clone(), key);
        }
        Ok(trust)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firefly_crypto::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn test_default_config_matches_engine_defaults() {
        let engine = Config::default().to_firefly_config().unwrap();
        assert_eq!(engine.chunk.mtu, 180);
        assert_eq!(engine.relay.initial_ttl, 2);
        assert_eq!(engine.swarm.promotion_rssi, -75);
        assert_eq!(engine.swarm.candidate_wait_max, Duration::from_secs(30));
        assert_eq!(engine.media.poll_interval, Duration::from_secs(3));
        assert_eq!(engine.media.retry.initial_backoff, Duration::from_millis(500));
        assert_eq!(engine.media.breaker.failure_threshold, 5);
        assert!(engine.validator.strict);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [node]
            node_id = "judge-4"
            coordinator_id = "coord"

            [swarm]
            redundancy_k = 3
            "#,
        )
        .unwrap();
        let engine = config.to_firefly_config().unwrap();
        assert_eq!(engine.relay.node_id, "judge-4");
        assert!(!engine.relay.is_coordinator());
        assert_eq!(engine.swarm.redundancy_k, 3);
        assert_eq!(engine.swarm.heartbeat, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.to_firefly_config().is_err());

        let mut config = Config::default();
        config.transport.mtu = 4;
        assert!(config.to_firefly_config().is_err());

        let mut config = Config::default();
        config.swarm.candidate_wait_min_secs = 40;
        assert!(config.to_firefly_config().is_err());
    }

    #[test]
    fn test_trust_table() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let mut config = Config::default();
        config.trust.insert("judge-1".into(), key.to_hex());
        let trust = config.trust_store().unwrap();
        assert_eq!(trust.get("judge-1"), Some(key));

        config.trust.insert("judge-2".into(), "zz".into());
        assert!(config.trust_store().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = Config::default();
        config.node.node_id = "coord".into();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.node.node_id, "coord");
        assert_eq!(loaded.media.rssi_threshold, -70);
        assert!(Config::load_or_default(&dir.path().join("missing.toml")).is_err());
    }
}
