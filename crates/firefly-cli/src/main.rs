//! Firefly CLI
//!
//! Key management, packet tooling and an in-process relay simulation.

mod config;
mod simulate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use firefly_core::clock::{Clock, SystemClock};
use firefly_core::{NodusPacket, PacketTracker, PacketValidator, Vote};
use firefly_crypto::{AeadKey, KdfParams, SALT_SIZE, SigningKey, derive_key};
use rand_core::OsRng;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use config::Config;

/// Firefly - self-organizing BLE relay for signed, encrypted votes
#[derive(Parser)]
#[command(name = "firefly")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new Ed25519 signing key
    Keygen {
        /// File for the hex seed (defaults to the configured key file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Derive a payload key from a password
    DeriveKey {
        /// Password
        #[arg(short, long)]
        password: String,

        /// Hex salt (16 bytes); generated if omitted
        #[arg(short, long)]
        salt: Option<String>,
    },

    /// Seal a vote into a packet and print it as hex
    Seal {
        /// Event identifier
        #[arg(long)]
        event: String,

        /// Project identifier
        #[arg(long)]
        project: String,

        /// Scores as JSON
        #[arg(long, default_value = "{}")]
        scores: String,

        /// Hex payload key (overrides the configured key)
        #[arg(long)]
        payload_key: Option<String>,
    },

    /// Decode and validate a hex packet
    Inspect {
        /// Packet as hex
        packet: String,

        /// Hex payload key; decrypts the body when given
        #[arg(long)]
        payload_key: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Run an author -> relays -> coordinator chain in memory
    Simulate {
        /// Relays between the author and the coordinator
        #[arg(long, default_value_t = 2)]
        relays: usize,

        /// Votes to send
        #[arg(long, default_value_t = 3)]
        votes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Keygen { output } => {
            let path = output.unwrap_or_else(|| config.node.signing_key_file.clone());
            generate_keypair(&path)?;
        }
        Commands::DeriveKey { password, salt } => {
            derive_payload_key(&Zeroizing::new(password), salt.as_deref())?;
        }
        Commands::Seal {
            event,
            project,
            scores,
            payload_key,
        } => {
            seal_vote(&config, &event, &project, &scores, payload_key.as_deref())?;
        }
        Commands::Inspect {
            packet,
            payload_key,
        } => {
            inspect_packet(&config, &packet, payload_key.as_deref())?;
        }
        Commands::Config => {
            config.to_firefly_config()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Simulate { relays, votes } => {
            simulate::run(&config, relays, votes).await?;
        }
    }

    Ok(())
}

/// Generate a signing key and store its seed as hex
fn generate_keypair(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing key file: {}", path.display());
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let seed = Zeroizing::new(hex::encode(signing_key.to_bytes()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, seed.as_bytes())?;

    println!("Public key: {}", signing_key.verifying_key().to_hex());
    println!("Signing key saved to: {}", path.display());
    Ok(())
}

/// Load a hex seed written by `keygen`
fn load_signing_key(path: &Path) -> anyhow::Result<SigningKey> {
    let contents = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read signing key {}", path.display()))?,
    );
    let raw = Zeroizing::new(hex::decode(contents.trim()).context("Signing key is not hex")?);
    let seed: &[u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Signing key must be 32 bytes, got {}", raw.len()))?;
    Ok(SigningKey::from_bytes(seed))
}

fn parse_payload_key(config: &Config, flag: Option<&str>) -> anyhow::Result<Option<AeadKey>> {
    let Some(key_hex) = flag.or(config.node.payload_key.as_deref()) else {
        return Ok(None);
    };
    let raw = Zeroizing::new(hex::decode(key_hex).context("Payload key is not hex")?);
    Ok(Some(AeadKey::from_slice(&raw)?))
}

/// Derive a payload key with the protocol PBKDF2 parameters
fn derive_payload_key(password: &str, salt: Option<&str>) -> anyhow::Result<()> {
    let salt = match salt {
        Some(s) => hex::decode(s).context("Salt is not hex")?,
        None => firefly_crypto::random::salt().to_vec(),
    };
    if salt.len() != SALT_SIZE {
        anyhow::bail!("Salt must be {SALT_SIZE} bytes, got {}", salt.len());
    }

    let key = derive_key(password.as_bytes(), &salt, KdfParams::default())?;
    println!("Salt:        {}", hex::encode(&salt));
    println!("Payload key: {}", hex::encode(key.as_bytes()));
    Ok(())
}

fn seal_vote(
    config: &Config,
    event: &str,
    project: &str,
    scores: &str,
    payload_key: Option<&str>,
) -> anyhow::Result<()> {
    let key = parse_payload_key(config, payload_key)?
        .context("No payload key: pass --payload-key or set node.payload_key")?;
    let signer = load_signing_key(&config.node.signing_key_file)?;
    let scores: serde_json::Value = serde_json::from_str(scores).context("Scores are not JSON")?;

    let node_id = &config.node.node_id;
    let vote = Vote::new(event, project, node_id.as_str(), scores);
    let body = serde_json::to_vec(&vote)?;
    let packet = NodusPacket::seal(
        firefly_core::PacketType::Vote,
        node_id,
        SystemClock.unix_time(),
        &body,
        &key,
        &signer,
    )?
    .with_ttl(config.node.initial_ttl);

    tracing::debug!(packet_id = %packet.id, vote = %vote.id, "Vote sealed");
    println!("{}", hex::encode(packet.encode()?));
    Ok(())
}

fn inspect_packet(config: &Config, packet_hex: &str, payload_key: Option<&str>) -> anyhow::Result<()> {
    let wire = hex::decode(packet_hex.trim()).context("Packet is not hex")?;
    let packet = NodusPacket::decode(&wire)?;

    println!("Id:        {}", packet.id);
    println!("Type:      {:?}", packet.packet_type);
    println!("Sender:    {}", packet.sender_id);
    println!("Timestamp: {}", packet.timestamp);
    println!("TTL:       {}", packet.ttl);
    println!("Hops:      [{}]", packet.hops.join(", "));
    println!("Signed:    {}", packet.is_signed());

    let engine = config.to_firefly_config()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let validator = PacketValidator::new(
        engine.validator,
        Arc::new(PacketTracker::new(engine.tracker, Arc::clone(&clock))),
        Arc::new(config.trust_store()?),
        clock,
    );
    match validator.validate_and_parse(&wire) {
        Ok(_) => println!("Valid:     yes"),
        Err(e) => println!("Valid:     no ({e})"),
    }

    if let Some(key) = parse_payload_key(config, payload_key)? {
        let plaintext = packet.open(&key)?;
        println!("Payload:   {}", String::from_utf8_lossy(&plaintext));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_keygen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/signing_key");
        generate_keypair(&path).unwrap();
        assert!(generate_keypair(&path).is_err());

        let key = load_signing_key(&path).unwrap();
        let sig = key.sign(b"vote");
        assert!(key.verifying_key().verify(b"vote", &sig).is_ok());
    }

    #[test]
    fn test_payload_key_parsing() {
        let mut config = Config::default();
        assert!(parse_payload_key(&config, None).unwrap().is_none());

        config.node.payload_key = Some("11".repeat(32));
        let key = parse_payload_key(&config, None).unwrap().unwrap();
        assert_eq!(key.as_bytes(), &[0x11; 32]);

        assert!(parse_payload_key(&config, Some("abcd")).is_err());
    }
}
