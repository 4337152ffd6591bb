//! Decrypted nodes as held by the cache

use std::sync::Arc;

use cirrus_core::types::{LinkDescriptor, NodeKind};
use cirrus_crypto::{ContentKey, KeyPacket, NodeKeyPair, NodePublicKey, SessionKey};

/// Unwrapped key material of one node.
///
/// Shared behind an `Arc`: children need the parent's session key and
/// signing key long after the parent was decrypted.
pub struct KeyMaterial {
    pub private_key: NodeKeyPair,
    pub session_key: SessionKey,
    /// The decrypted key packet (carries the packet id and parent binding)
    pub packet: KeyPacket,
    /// The wrapped packet exactly as served, base64
    pub wrapped_passphrase: String,
    pub content_key: Option<ContentKey>,
}

impl KeyMaterial {
    pub fn key_packet_id(&self) -> &str {
        self.packet.id()
    }

    pub fn public_key(&self) -> NodePublicKey {
        self.private_key.public()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_packet_id", &self.packet.id())
            .field("public_key", &self.private_key.public().fingerprint())
            .field("content_key", &self.content_key.is_some())
            .finish()
    }
}

/// Signatures carried by a link, checked by the integrity verifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signatures {
    pub passphrase_signature: String,
    pub node_signature: String,
    pub signature_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Trust {
    #[default]
    Unverified,
    Verified,
    Distrusted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareState {
    pub creator: String,
    pub root_link_id: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderState {
    /// Known non-trashed children, in display order
    pub child_ids: Vec<String>,
    /// Set after the first successful page load
    pub loaded: bool,
    pub last_loaded_offset: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub revision_id: String,
    pub content_key_packet: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDetails {
    Share(ShareState),
    Folder(FolderState),
    File(FileState),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    /// Tree parent. A root folder hangs under its share.
    pub parent_id: Option<String>,
    pub share_id: String,
    pub kind: NodeKind,
    pub name: String,
    pub encrypted_name: String,
    pub name_hash: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub size: u64,
    pub trashed: bool,
    pub trashed_at: Option<u64>,
    pub keys: Arc<KeyMaterial>,
    pub signatures: Signatures,
    pub trust: Trust,
    pub details: NodeDetails,
}

impl Node {
    /// Build a node from its wire record and freshly unwrapped keys.
    pub fn from_link(
        link: &LinkDescriptor,
        name: String,
        keys: Arc<KeyMaterial>,
        details: NodeDetails,
    ) -> Self {
        let parent_id = match (&link.parent_id, link.kind) {
            (Some(parent), _) => Some(parent.clone()),
            (None, NodeKind::Share) => None,
            (None, _) => Some(link.share_id.clone()),
        };
        Self {
            id: link.id.clone(),
            parent_id,
            share_id: link.share_id.clone(),
            kind: link.kind,
            name,
            encrypted_name: link.encrypted_name.clone(),
            name_hash: link.name_hash.clone(),
            created_at: link.created_at,
            modified_at: link.modified_at,
            size: link.size,
            trashed: link.trashed,
            trashed_at: link.trashed_at,
            keys,
            signatures: Signatures {
                passphrase_signature: link.passphrase_signature.clone(),
                node_signature: link.node_signature.clone(),
                signature_email: link.signature_email.clone(),
            },
            trust: Trust::Unverified,
            details,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.details, NodeDetails::Folder(_))
    }

    pub fn is_share(&self) -> bool {
        matches!(self.details, NodeDetails::Share(_))
    }

    pub fn folder(&self) -> Option<&FolderState> {
        match &self.details {
            NodeDetails::Folder(state) => Some(state),
            _ => None,
        }
    }

    pub fn folder_mut(&mut self) -> Option<&mut FolderState> {
        match &mut self.details {
            NodeDetails::Folder(state) => Some(state),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<&FileState> {
        match &self.details {
            NodeDetails::File(state) => Some(state),
            _ => None,
        }
    }

    pub fn share(&self) -> Option<&ShareState> {
        match &self.details {
            NodeDetails::Share(state) => Some(state),
            _ => None,
        }
    }

    /// Empty for anything that is not a folder.
    pub fn child_ids(&self) -> &[String] {
        self.folder().map(|f| f.child_ids.as_slice()).unwrap_or(&[])
    }

    pub fn is_loaded(&self) -> bool {
        self.folder().is_some_and(|f| f.loaded)
    }

    pub fn key_packet_id(&self) -> &str {
        self.keys.key_packet_id()
    }
}

/// Reverse index entry so a trashed node can be restored to where it was
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashEntry {
    pub kind: NodeKind,
    pub original_parent_id: Option<String>,
    pub trashed_at: u64,
}

/// Per-node decryption failure statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorStats {
    pub count: u32,
    pub last_message: String,
}
