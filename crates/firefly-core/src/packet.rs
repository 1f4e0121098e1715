//! Nodus packet envelope and wire codec.
//!
//! A packet travels as one chunked payload:
//!
//! ```text
//! [0x01][JSON body]
//! ```
//!
//! Binary fields (`nonce`, `signature`, `encryptedPayload`) are base64 in the
//! JSON body. Relays touch only `ttl` and `hops`; everything else is carried
//! byte-for-byte from the author.

use firefly_crypto::{AeadKey, NONCE_SIZE, Nonce, SIGNATURE_SIZE, SigningKey, TAG_SIZE};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TTL;
use crate::error::PacketError;

/// Payload tag for JSON/control packets
pub const TAG_PACKET: u8 = 0x01;

/// Payload tag for media transfers
pub const TAG_MEDIA: u8 = 0x02;

/// Payload tag for catalog transfers
pub const TAG_CATALOG: u8 = 0x03;

/// Payload tag for media acknowledgements
pub const TAG_ACK: u8 = 0xA1;

/// Packet kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketType {
    /// Key exchange request
    Handshake,
    /// Key exchange response
    HandshakeAck,
    /// A judge's vote
    Vote,
    /// State synchronisation
    Sync,
}

impl PacketType {
    /// Types whose signature is checked even outside strict mode
    #[must_use]
    pub fn requires_signature(self) -> bool {
        matches!(self, PacketType::Vote | PacketType::Sync)
    }
}

/// Signed, encrypted envelope relayed through the swarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodusPacket {
    /// Unique id, the replay/loop key
    pub id: String,

    /// Packet kind
    #[serde(rename = "type")]
    pub packet_type: PacketType,

    /// Creation time, seconds since the Unix epoch
    pub timestamp: u64,

    /// Original author
    pub sender_id: String,

    /// Remaining relay hops
    pub ttl: u8,

    /// Relays traversed so far, in order
    #[serde(default)]
    pub hops: Vec<String>,

    /// AEAD nonce
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,

    /// Ed25519 signature over [`signable_bytes`](Self::signable_bytes); empty if unsigned
    #[serde(with = "base64_bytes", default)]
    pub signature: Vec<u8>,

    /// Ciphertext followed by the AEAD tag
    #[serde(with = "base64_bytes")]
    pub encrypted_payload: Vec<u8>,
}

impl NodusPacket {
    /// Encrypt and sign a new packet.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Crypto`] if encryption fails.
    pub fn seal(
        packet_type: PacketType,
        sender_id: &str,
        timestamp: u64,
        plaintext: &[u8],
        key: &AeadKey,
        signer: &SigningKey,
    ) -> Result<Self, PacketError> {
        let blob = key.encrypt(plaintext)?;
        let (nonce, ciphertext) = firefly_crypto::aead::split_blob(&blob)?;

        let mut packet = Self {
            id: firefly_crypto::random::packet_id(),
            packet_type,
            timestamp,
            sender_id: sender_id.to_string(),
            ttl: DEFAULT_TTL,
            hops: Vec::new(),
            nonce: nonce.as_bytes().to_vec(),
            signature: Vec::new(),
            encrypted_payload: ciphertext.to_vec(),
        };
        packet.sign(signer);
        Ok(packet)
    }

    /// Override the hop budget
    #[must_use]
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sign the packet in place
    pub fn sign(&mut self, signer: &SigningKey) {
        self.signature = signer.sign(&self.signable_bytes()).as_bytes().to_vec();
    }

    /// Decrypt the payload.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Crypto`] if the nonce is malformed or the tag
    /// does not authenticate.
    pub fn open(&self, key: &AeadKey) -> Result<Vec<u8>, PacketError> {
        let nonce = Nonce::from_slice(&self.nonce).ok_or(PacketError::InvalidField("nonce"))?;
        Ok(key.decrypt_parts(&nonce, &self.encrypted_payload)?)
    }

    /// Bytes covered by the signature: id, sender, timestamp and ciphertext.
    ///
    /// Each variable-length field is length-prefixed so field boundaries
    /// cannot shift. `ttl` and `hops` are excluded because relays mutate them.
    #[must_use]
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            16 + self.id.len() + self.sender_id.len() + self.encrypted_payload.len(),
        );
        put_prefixed(&mut out, self.id.as_bytes());
        put_prefixed(&mut out, self.sender_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        put_prefixed(&mut out, &self.encrypted_payload);
        out
    }

    /// True if a signature is attached
    #[must_use]
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// True if `node_id` already relayed this packet
    #[must_use]
    pub fn has_visited(&self, node_id: &str) -> bool {
        self.hops.iter().any(|hop| hop == node_id)
    }

    /// Encode to the tagged wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut out = vec![TAG_PACKET];
        serde_json::to_writer(&mut out, self).map_err(|e| PacketError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode and structurally check the tagged wire form.
    ///
    /// # Errors
    ///
    /// - [`PacketError::Empty`] / [`PacketError::WrongTag`] for a bad tag
    /// - [`PacketError::Malformed`] for invalid JSON or base64
    /// - [`PacketError::InvalidField`] for impossible field values
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let (&tag, body) = bytes.split_first().ok_or(PacketError::Empty)?;
        if tag != TAG_PACKET {
            return Err(PacketError::WrongTag(tag));
        }

        let packet: Self =
            serde_json::from_slice(body).map_err(|e| PacketError::Malformed(e.to_string()))?;

        if packet.id.is_empty() {
            return Err(PacketError::InvalidField("id"));
        }
        if packet.sender_id.is_empty() {
            return Err(PacketError::InvalidField("senderId"));
        }
        if packet.nonce.len() != NONCE_SIZE {
            return Err(PacketError::InvalidField("nonce"));
        }
        if !packet.signature.is_empty() && packet.signature.len() != SIGNATURE_SIZE {
            return Err(PacketError::InvalidField("signature"));
        }
        if packet.encrypted_payload.len() < TAG_SIZE {
            return Err(PacketError::InvalidField("encryptedPayload"));
        }

        Ok(packet)
    }
}

fn put_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
