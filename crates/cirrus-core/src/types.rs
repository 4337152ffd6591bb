//! Wire records exchanged with the remote store.
//!
//! Everything here is ciphertext or public metadata: the remote never sees a
//! decrypted name or an unwrapped key. Binary fields are standard base64.

use serde::{Deserialize, Serialize};

/// Kind of a node in the encrypted tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Share,
    Folder,
    File,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Share => "share",
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
        }
    }

    /// Shares and folders encrypt their name to their own key; files use the
    /// parent's session key so the name travels with the parent on rename.
    pub fn name_uses_parent_key(&self) -> bool {
        matches!(self, NodeKind::File)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-only properties of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProperties {
    pub revision_id: String,
    /// Content key encrypted to the file's node key
    pub content_key_packet: String,
    /// Signature over the raw content key by the file's signing key
    pub content_key_signature: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// An encrypted node as served by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDescriptor {
    pub id: String,
    pub parent_id: Option<String>,
    pub share_id: String,
    pub kind: NodeKind,
    pub encrypted_name: String,
    /// Keyed hash of the lowercase name; lets the remote detect sibling conflicts
    pub name_hash: String,
    /// Node private key, locked with the node's session key
    pub node_key: String,
    /// Key packet wrapped under the parent's key
    pub node_passphrase: String,
    /// Signature over the wrapped key packet by the parent's signing key
    pub passphrase_signature: String,
    /// Signature over key packet id ‖ node public key by the node's own key
    pub node_signature: String,
    pub signature_email: String,
    pub key_packet_id: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub size: u64,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub trashed_at: Option<u64>,
    #[serde(default)]
    pub file: Option<FileProperties>,
}

/// A share: the top of one key hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareDescriptor {
    /// The share's own key material; `link.id` is the share id
    pub link: LinkDescriptor,
    pub root_link_id: String,
    /// Address that created the share and signs its nodes
    pub creator: String,
    pub is_primary: bool,
}

/// Lightweight listing entry returned by `get_shares`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareSummary {
    pub share_id: String,
    pub root_link_id: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: u64,
    pub total_items: u64,
}

/// One page of a folder listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderPage {
    pub items: Vec<LinkDescriptor>,
    pub pagination: Pagination,
}

/// Why the remote refused one item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "camelCase")]
pub enum RejectReason {
    NameConflict,
    Invalid(String),
    NotFound,
    SelfReferential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: String,
    pub reason: RejectReason,
}

/// Result discriminant of every mutation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MutationOutcome {
    Success {
        accepted_ids: Vec<String>,
    },
    PartialSuccess {
        accepted_ids: Vec<String>,
        rejected: Vec<Rejection>,
    },
    Failure {
        reason: String,
    },
}

impl MutationOutcome {
    /// Build the discriminant from accepted/rejected lists.
    pub fn from_parts(accepted_ids: Vec<String>, rejected: Vec<Rejection>) -> Self {
        if rejected.is_empty() {
            MutationOutcome::Success { accepted_ids }
        } else {
            MutationOutcome::PartialSuccess {
                accepted_ids,
                rejected,
            }
        }
    }

    pub fn accepted(&self) -> &[String] {
        match self {
            MutationOutcome::Success { accepted_ids }
            | MutationOutcome::PartialSuccess { accepted_ids, .. } => accepted_ids,
            MutationOutcome::Failure { .. } => &[],
        }
    }

    pub fn rejected(&self) -> &[Rejection] {
        match self {
            MutationOutcome::PartialSuccess { rejected, .. } => rejected,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub share_id: String,
    pub link: LinkDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub share_id: String,
    pub link_id: String,
    pub encrypted_name: String,
    pub name_hash: String,
    pub modified_at: u64,
}

/// Re-wrapped key material for one moved link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedLink {
    pub link_id: String,
    pub node_passphrase: String,
    pub passphrase_signature: String,
    pub encrypted_name: String,
    pub name_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub share_id: String,
    pub target_id: String,
    pub links: Vec<MovedLink>,
}

/// First SRP round: what the client needs to compute its proof
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub session_id: String,
    pub salt: String,
    pub server_public: String,
}

/// Second SRP round: the server's proof of the shared key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub session_id: String,
    pub server_proof: String,
}

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_wire_shape() {
        let outcome = MutationOutcome::from_parts(
            vec!["a".into()],
            vec![Rejection {
                id: "b".into(),
                reason: RejectReason::NameConflict,
            }],
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "partialSuccess");
        assert_eq!(json["rejected"][0]["reason"]["code"], "nameConflict");
        assert_eq!(outcome.accepted(), &["a".to_string()]);
    }

    #[test]
    fn empty_rejections_is_success() {
        let outcome = MutationOutcome::from_parts(vec!["a".into()], vec![]);
        assert!(matches!(outcome, MutationOutcome::Success { .. }));
        assert!(outcome.rejected().is_empty());
    }

    #[test]
    fn failure_accepts_nothing() {
        let outcome = MutationOutcome::Failure {
            reason: "quota".into(),
        };
        assert!(outcome.accepted().is_empty());
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&NodeKind::Folder).unwrap(), "\"folder\"");
        assert!(NodeKind::File.name_uses_parent_key());
        assert!(!NodeKind::Folder.name_uses_parent_key());
    }
}
