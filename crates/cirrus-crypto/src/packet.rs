//! Key packets: the envelope carrying a node's session key.
//!
//! Wire format (JSON, camelCase, exactly these fields):
//! ```text
//! { "sessionKey": base64, "parentKeyPacketId": string|null, "created": u64,
//!   "version": u32, "keyType": string, "id": string }
//! ```
//! A packet is sealed under the parent's session key, or for shares
//! hybrid-encrypted to the user key. `parentKeyPacketId` pins the packet to
//! the exact parent key it was wrapped under.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encoding::{b64_decode, b64_encode};
use crate::hybrid::{decrypt_with, encrypt_to};
use crate::keypair::{NodeKeyPair, NodePublicKey};
use crate::session::{open, seal, SessionKey};

/// Current key packet format version
pub const KEY_PACKET_VERSION: u32 = 1;

const PACKET_AAD: &[u8] = b"cirrus-key-packet-v1";

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyPacket {
    session_key: String,
    parent_key_packet_id: Option<String>,
    created: u64,
    version: u32,
    key_type: String,
    id: String,
}

impl KeyPacket {
    /// Build a packet with a fresh id.
    pub fn new(
        session_key: &SessionKey,
        parent_key_packet_id: Option<&str>,
        key_type: &str,
        created: u64,
    ) -> Self {
        Self {
            session_key: b64_encode(session_key.as_bytes()),
            parent_key_packet_id: parent_key_packet_id.map(str::to_string),
            created,
            version: KEY_PACKET_VERSION,
            key_type: key_type.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_key_packet_id(&self) -> Option<&str> {
        self.parent_key_packet_id.as_deref()
    }

    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn session_key(&self) -> anyhow::Result<SessionKey> {
        let mut raw = b64_decode(&self.session_key)?;
        let key = SessionKey::from_slice(&raw);
        raw.zeroize();
        key
    }

    /// Same session key and id, re-parented under another key packet.
    pub fn reparented(&self, parent_key_packet_id: &str) -> Self {
        let mut packet = self.clone();
        packet.parent_key_packet_id = Some(parent_key_packet_id.to_string());
        packet
    }

    /// Seal under the parent's session key.
    pub fn wrap_with_session(&self, parent: &SessionKey) -> anyhow::Result<Vec<u8>> {
        let mut json = self.to_bytes()?;
        let sealed = seal(parent.as_bytes(), &json, PACKET_AAD);
        json.zeroize();
        sealed
    }

    /// Hybrid-encrypt to a public key (share packets addressed to the user).
    pub fn wrap_to_key(&self, recipient: &NodePublicKey) -> anyhow::Result<Vec<u8>> {
        let mut json = self.to_bytes()?;
        let msg = encrypt_to(recipient, &json);
        json.zeroize();
        msg
    }

    pub fn unwrap_with_session(wrapped: &[u8], parent: &SessionKey) -> anyhow::Result<Self> {
        let mut json = open(parent.as_bytes(), wrapped, PACKET_AAD)
            .map_err(|_| anyhow::anyhow!("key packet unwrap failed: wrong parent key"))?;
        let packet = Self::from_bytes(&json);
        json.zeroize();
        packet
    }

    pub fn unwrap_with_key(wrapped: &[u8], keypair: &NodeKeyPair) -> anyhow::Result<Self> {
        let mut json = decrypt_with(keypair, wrapped)
            .map_err(|_| anyhow::anyhow!("key packet unwrap failed: wrong private key"))?;
        let packet = Self::from_bytes(&json);
        json.zeroize();
        packet
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("key packet serialization: {e}"))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        let packet: Self = serde_json::from_slice(data)
            .map_err(|e| anyhow::anyhow!("key packet deserialization: {e}"))?;
        if packet.version != KEY_PACKET_VERSION {
            anyhow::bail!("unsupported key packet version {}", packet.version);
        }
        Ok(packet)
    }
}

impl std::fmt::Debug for KeyPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPacket")
            .field("id", &self.id)
            .field("parent_key_packet_id", &self.parent_key_packet_id)
            .field("key_type", &self.key_type)
            .field("created", &self.created)
            .field("version", &self.version)
            .field("session_key", &"[REDACTED]")
            .finish()
    }
}
