//! Sealing and opening node envelopes.
//!
//! Opening walks one step down the key hierarchy:
//!
//! 1. unwrap the key packet with the parent key (the user key for shares,
//!    the parent's session key otherwise) and check it names that parent
//! 2. unlock the node private key with the packet's session key
//! 3. decrypt the name (files: parent session key; others: own key)
//! 4. files: unwrap the content key and check its signature
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! crypto pool.

use std::sync::Arc;

use anyhow::Context;
use cirrus_core::types::{FileProperties, LinkDescriptor, NodeKind, ShareDescriptor};
use cirrus_crypto::content::{open_content_key, seal_content_key};
use cirrus_crypto::encoding::{b64_decode, b64_encode};
use cirrus_crypto::names::{
    decrypt_name_with, decrypt_name_with_session, encrypt_name_to, encrypt_name_with_session,
    name_hash,
};
use cirrus_crypto::{generate_content_key, generate_session_key, KeyPacket, NodeKeyPair, NodePublicKey};

use crate::node::{FileState, FolderState, KeyMaterial, Node, NodeDetails, ShareState};

/// Bytes covered by a node signature: key packet id ‖ node public key.
pub fn node_signature_payload(key_packet_id: &str, public: &NodePublicKey) -> Vec<u8> {
    let mut payload = Vec::with_capacity(key_packet_id.len() + 64);
    payload.extend_from_slice(key_packet_id.as_bytes());
    payload.extend_from_slice(&public.to_bytes());
    payload
}

/// A freshly sealed node: the wire record plus the keys that produced it.
pub struct SealedNode {
    pub link: LinkDescriptor,
    pub keys: KeyMaterial,
}

/// What to seal under a parent.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub id: String,
    pub share_id: String,
    /// `None` for a share's root folder
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub name: String,
    pub size: u64,
    pub signer_email: String,
    pub now: u64,
}

/// Seal a new share whose key packet is addressed to `user_key`.
pub fn seal_share(
    user_key: &NodeKeyPair,
    share_id: &str,
    name: &str,
    signer_email: &str,
    now: u64,
) -> anyhow::Result<SealedNode> {
    let private_key = NodeKeyPair::generate();
    let session_key = generate_session_key();
    let packet = KeyPacket::new(&session_key, None, NodeKind::Share.as_str(), now);

    let wrapped = packet.wrap_to_key(&user_key.public())?;
    // a share vouches for its own key packet
    let passphrase_signature = private_key.sign(&wrapped);
    let node_key = private_key.lock(session_key.as_bytes())?;
    let encrypted_name = encrypt_name_to(&private_key.public(), name)?;
    let node_signature = private_key.sign(&node_signature_payload(packet.id(), &private_key.public()));

    let link = LinkDescriptor {
        id: share_id.to_string(),
        parent_id: None,
        share_id: share_id.to_string(),
        kind: NodeKind::Share,
        encrypted_name,
        name_hash: String::new(),
        node_key: b64_encode(&node_key),
        node_passphrase: b64_encode(&wrapped),
        passphrase_signature: b64_encode(&passphrase_signature),
        node_signature: b64_encode(&node_signature),
        signature_email: signer_email.to_string(),
        key_packet_id: packet.id().to_string(),
        created_at: now,
        modified_at: now,
        size: 0,
        trashed: false,
        trashed_at: None,
        file: None,
    };
    let keys = KeyMaterial {
        private_key,
        session_key,
        wrapped_passphrase: link.node_passphrase.clone(),
        packet,
        content_key: None,
    };
    Ok(SealedNode { link, keys })
}

/// Seal a new folder or file under `parent`.
pub fn seal_child(parent: &KeyMaterial, spec: &ChildSpec) -> anyhow::Result<SealedNode> {
    if spec.kind == NodeKind::Share {
        anyhow::bail!("shares are sealed to a user key, not a parent node");
    }

    let private_key = NodeKeyPair::generate();
    let session_key = generate_session_key();
    let packet = KeyPacket::new(
        &session_key,
        Some(parent.key_packet_id()),
        spec.kind.as_str(),
        spec.now,
    );

    let wrapped = packet.wrap_with_session(&parent.session_key)?;
    let passphrase_signature = parent.private_key.sign(&wrapped);
    let node_key = private_key.lock(session_key.as_bytes())?;
    let encrypted_name = if spec.kind.name_uses_parent_key() {
        encrypt_name_with_session(&parent.session_key, &spec.name)?
    } else {
        encrypt_name_to(&private_key.public(), &spec.name)?
    };
    let hash = name_hash(&parent.session_key, &spec.name)?;
    let node_signature = private_key.sign(&node_signature_payload(packet.id(), &private_key.public()));

    let (file, content_key) = if spec.kind == NodeKind::File {
        let content_key = generate_content_key();
        let (key_packet, signature) = seal_content_key(&content_key, &private_key)?;
        let props = FileProperties {
            revision_id: uuid::Uuid::new_v4().to_string(),
            content_key_packet: b64_encode(&key_packet),
            content_key_signature: b64_encode(&signature),
            thumbnail: None,
        };
        (Some(props), Some(content_key))
    } else {
        (None, None)
    };

    let link = LinkDescriptor {
        id: spec.id.clone(),
        parent_id: spec.parent_id.clone(),
        share_id: spec.share_id.clone(),
        kind: spec.kind,
        encrypted_name,
        name_hash: hash,
        node_key: b64_encode(&node_key),
        node_passphrase: b64_encode(&wrapped),
        passphrase_signature: b64_encode(&passphrase_signature),
        node_signature: b64_encode(&node_signature),
        signature_email: spec.signer_email.clone(),
        key_packet_id: packet.id().to_string(),
        created_at: spec.now,
        modified_at: spec.now,
        size: spec.size,
        trashed: false,
        trashed_at: None,
        file,
    };
    let keys = KeyMaterial {
        private_key,
        session_key,
        wrapped_passphrase: link.node_passphrase.clone(),
        packet,
        content_key,
    };
    Ok(SealedNode { link, keys })
}

/// Open a share with the user's unlocked private key.
pub fn open_share(share: &ShareDescriptor, user_key: &NodeKeyPair) -> anyhow::Result<Node> {
    let link = &share.link;
    let wrapped = b64_decode(&link.node_passphrase).context("share passphrase encoding")?;
    let packet = KeyPacket::unwrap_with_key(&wrapped, user_key)
        .with_context(|| format!("share {}: key packet", link.id))?;
    if packet.parent_key_packet_id().is_some() {
        anyhow::bail!("share {}: key packet claims a parent packet", link.id);
    }

    let keys = unlock(link, packet, None)?;
    let name = decrypt_name_with(&keys.private_key, &link.encrypted_name)
        .with_context(|| format!("share {}: name", link.id))?;
    let details = NodeDetails::Share(ShareState {
        creator: share.creator.clone(),
        root_link_id: share.root_link_id.clone(),
        is_primary: share.is_primary,
    });
    Ok(Node::from_link(link, name, Arc::new(keys), details))
}

/// Open a folder or file with its parent's unlocked key material.
pub fn open_child(link: &LinkDescriptor, parent: &KeyMaterial) -> anyhow::Result<Node> {
    if link.kind == NodeKind::Share {
        anyhow::bail!("node {}: shares cannot be opened under a parent", link.id);
    }

    let wrapped = b64_decode(&link.node_passphrase).context("node passphrase encoding")?;
    let packet = KeyPacket::unwrap_with_session(&wrapped, &parent.session_key)
        .with_context(|| format!("node {}: key packet", link.id))?;
    if packet.parent_key_packet_id() != Some(parent.key_packet_id()) {
        anyhow::bail!(
            "node {}: key packet was wrapped for parent packet {:?}, not {}",
            link.id,
            packet.parent_key_packet_id(),
            parent.key_packet_id()
        );
    }

    let keys = unlock(link, packet, Some(parent))?;
    let name = match link.kind.name_uses_parent_key() {
        true => decrypt_name_with_session(&parent.session_key, &link.encrypted_name),
        false => decrypt_name_with(&keys.private_key, &link.encrypted_name),
    };
    let name = name.with_context(|| format!("node {}: name", link.id))?;

    let details = match (link.kind, &link.file) {
        (NodeKind::File, Some(file)) => NodeDetails::File(FileState {
            revision_id: file.revision_id.clone(),
            content_key_packet: file.content_key_packet.clone(),
            thumbnail: file.thumbnail.clone(),
        }),
        (NodeKind::File, None) => anyhow::bail!("file {} has no file properties", link.id),
        _ => NodeDetails::Folder(FolderState::default()),
    };
    Ok(Node::from_link(link, name, Arc::new(keys), details))
}

/// Steps 2 and 4: unlock the private key, then the content key for files.
fn unlock(
    link: &LinkDescriptor,
    packet: KeyPacket,
    parent: Option<&KeyMaterial>,
) -> anyhow::Result<KeyMaterial> {
    if packet.id() != link.key_packet_id {
        anyhow::bail!(
            "node {}: key packet id {} does not match descriptor {}",
            link.id,
            packet.id(),
            link.key_packet_id
        );
    }
    let session_key = packet.session_key()?;
    let locked = b64_decode(&link.node_key).context("node key encoding")?;
    let private_key = NodeKeyPair::unlock(&locked, session_key.as_bytes())
        .with_context(|| format!("node {}: private key", link.id))?;

    let content_key = match (&link.file, parent) {
        (Some(file), Some(_)) => {
            let key_packet = b64_decode(&file.content_key_packet)?;
            let signature = b64_decode(&file.content_key_signature)?;
            let key = open_content_key(&key_packet, &signature, &private_key, &private_key.public())
                .with_context(|| format!("file {}: content key", link.id))?;
            Some(key)
        }
        _ => None,
    };

    Ok(KeyMaterial {
        private_key,
        session_key,
        wrapped_passphrase: link.node_passphrase.clone(),
        packet,
        content_key,
    })
}

/// Re-wrap an existing node's key packet under a new parent.
///
/// Same session key and packet id; only the parent binding and the
/// parent's signature change. Returns the new key material, the wrapped
/// packet (base64) and its signature (base64).
pub fn rewrap_for_parent(
    keys: &KeyMaterial,
    new_parent: &KeyMaterial,
) -> anyhow::Result<(KeyMaterial, String, String)> {
    let packet = keys.packet.reparented(new_parent.key_packet_id());
    let wrapped = packet.wrap_with_session(&new_parent.session_key)?;
    let signature = new_parent.private_key.sign(&wrapped);
    let wrapped_b64 = b64_encode(&wrapped);
    let material = KeyMaterial {
        private_key: keys.private_key.clone(),
        session_key: keys.session_key.clone(),
        packet,
        wrapped_passphrase: wrapped_b64.clone(),
        content_key: keys.content_key.clone(),
    };
    Ok((material, wrapped_b64, b64_encode(&signature)))
}
