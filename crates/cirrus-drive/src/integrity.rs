//! Signature chain verification.
//!
//! For a node:
//!   (a) its wrapped key packet is signed by the parent's signing key
//!       (a share signs its own packet)
//!   (b) its node signature over `key packet id ‖ public key` is by its own key
//!   (c) the signer address equals the share creator
//!
//! A failed check marks the node distrusted and is logged. It never blocks
//! reads; callers decide what to do with an untrusted node.

use std::sync::Arc;

use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::encoding::b64_decode;
use cirrus_crypto::NodePublicKey;
use tracing::{debug, warn};

use crate::envelope::node_signature_payload;
use crate::node::{Node, Trust};
use crate::pool::CryptoPool;
use crate::store::{CacheAction, NodeCache};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeVerification {
    /// True when the folder and every direct child verified
    pub verified: bool,
    pub unverified_items: Vec<String>,
    /// Ancestor ids of the folder, nearest first, ending at the share
    pub chain: Vec<String>,
}

/// Everything needed to check one node, detached from the cache.
struct CheckInput {
    id: String,
    wrapped_passphrase: String,
    passphrase_signature: String,
    node_signature: String,
    signature_email: String,
    key_packet_id: String,
    public_key: NodePublicKey,
    parent_key: NodePublicKey,
    creator: String,
}

#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    cache: Arc<NodeCache>,
    pool: Arc<CryptoPool>,
    batch_size: usize,
}

impl IntegrityVerifier {
    pub fn new(cache: Arc<NodeCache>, pool: Arc<CryptoPool>, batch_size: usize) -> Self {
        Self {
            cache,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Check one node and record the verdict in the cache.
    pub async fn verify(&self, node_id: &str) -> DriveResult<bool> {
        let input = self.prepare(node_id)?;
        let verdict = self.pool.run(move || check(&input)).await?;
        Ok(self.record(node_id, verdict))
    }

    /// Check a folder and its direct children in parallel.
    pub async fn verify_tree(&self, folder_id: &str) -> DriveResult<TreeVerification> {
        let folder = self
            .cache
            .get(folder_id)
            .ok_or_else(|| DriveError::NotFound(folder_id.to_string()))?;

        let mut ids = vec![folder.id.clone()];
        ids.extend(self.cache.children(folder_id).iter().map(|c| c.id.clone()));

        let mut unverified = Vec::new();
        let mut inputs = Vec::new();
        for id in &ids {
            match self.prepare(id) {
                Ok(input) => inputs.push(input),
                Err(e) => {
                    warn!(node_id = %id, error = %e, "cannot verify node");
                    unverified.push(id.clone());
                }
            }
        }

        let checked: Vec<String> = inputs.iter().map(|i| i.id.clone()).collect();
        let verdicts = self
            .pool
            .run_batch(inputs, self.batch_size, |input| Ok(check(&input)))
            .await;
        for (id, verdict) in checked.iter().zip(verdicts) {
            let verdict = verdict.unwrap_or_else(|e| Err(e.to_string()));
            if !self.record(id, verdict) {
                unverified.push(id.clone());
            }
        }

        Ok(TreeVerification {
            verified: unverified.is_empty(),
            unverified_items: unverified,
            chain: self.cache.ancestors(folder_id),
        })
    }

    fn record(&self, node_id: &str, verdict: Result<(), String>) -> bool {
        let (ok, trust) = match verdict {
            Ok(()) => {
                debug!(node_id, "signature chain verified");
                (true, Trust::Verified)
            }
            Err(reason) => {
                warn!(node_id, reason = %reason, "signature chain mismatch");
                (false, Trust::Distrusted(reason))
            }
        };
        self.cache.dispatch(CacheAction::RecordIntegrity {
            id: node_id.to_string(),
            trust,
        });
        ok
    }

    fn prepare(&self, node_id: &str) -> DriveResult<CheckInput> {
        let node = self
            .cache
            .get(node_id)
            .ok_or_else(|| DriveError::NotFound(node_id.to_string()))?;
        let share = self.share_of(&node)?;
        let creator = share
            .share()
            .map(|s| s.creator.clone())
            .unwrap_or_default();

        let parent_key = if node.is_share() {
            node.keys.public_key()
        } else {
            let parent_id = node.parent_id.as_deref().ok_or_else(|| integrity(&node, "no parent"))?;
            let parent = self
                .cache
                .get(parent_id)
                .ok_or_else(|| integrity(&node, "parent is not cached"))?;
            parent.keys.public_key()
        };

        Ok(CheckInput {
            id: node.id.clone(),
            wrapped_passphrase: node.keys.wrapped_passphrase.clone(),
            passphrase_signature: node.signatures.passphrase_signature.clone(),
            node_signature: node.signatures.node_signature.clone(),
            signature_email: node.signatures.signature_email.clone(),
            key_packet_id: node.key_packet_id().to_string(),
            public_key: node.keys.public_key(),
            parent_key,
            creator,
        })
    }

    fn share_of(&self, node: &Node) -> DriveResult<Arc<Node>> {
        self.cache
            .get(&node.share_id)
            .filter(|s| s.is_share())
            .ok_or_else(|| integrity(node, "share is not cached"))
    }
}

fn integrity(node: &Node, message: &str) -> DriveError {
    DriveError::Integrity {
        node_id: node.id.clone(),
        message: message.to_string(),
    }
}

fn check(input: &CheckInput) -> Result<(), String> {
    let wrapped = b64_decode(&input.wrapped_passphrase).map_err(|e| e.to_string())?;
    let passphrase_sig = b64_decode(&input.passphrase_signature).map_err(|e| e.to_string())?;
    input
        .parent_key
        .verify(&wrapped, &passphrase_sig)
        .map_err(|_| "key packet not signed by parent key".to_string())?;

    let node_sig = b64_decode(&input.node_signature).map_err(|e| e.to_string())?;
    let payload = node_signature_payload(&input.key_packet_id, &input.public_key);
    input
        .public_key
        .verify(&payload, &node_sig)
        .map_err(|_| "node signature not made by node key".to_string())?;

    if input.signature_email != input.creator {
        return Err(format!(
            "signed by {} but share creator is {}",
            input.signature_email, input.creator
        ));
    }
    Ok(())
}
