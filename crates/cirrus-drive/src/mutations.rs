//! Mutation coordinator: create, rename, move, trash, restore, delete.
//!
//! Each operation validates locally, asks the remote, then applies only the
//! accepted ids to the cache and re-balances folder sizes. Rejected ids are
//! folded into one `Conflict` error naming the first few of them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cirrus_core::remote::RemoteApi;
use cirrus_core::types::{
    unix_now, CreateFolderRequest, MoveRequest, MovedLink, MutationOutcome, NodeKind,
    RejectReason, Rejection, RenameRequest,
};
use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::names::{encrypt_name_to, encrypt_name_with_session, name_hash};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::envelope::{rewrap_for_parent, seal_child, ChildSpec};
use crate::keychain::KeyChainDecryptor;
use crate::node::{FolderState, KeyMaterial, Node, NodeDetails};
use crate::pool::CryptoPool;
use crate::size::SizeAggregator;
use crate::store::{CacheAction, NodeCache};

/// A moved link ready to send, plus the key material it will have after.
struct PreparedMove {
    id: String,
    keys: KeyMaterial,
    link: MovedLink,
}

pub struct MutationCoordinator {
    remote: Arc<dyn RemoteApi>,
    cache: Arc<NodeCache>,
    pool: Arc<CryptoPool>,
    decryptor: Arc<KeyChainDecryptor>,
    sizes: SizeAggregator,
    signer_email: Option<String>,
}

impl MutationCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        cache: Arc<NodeCache>,
        pool: Arc<CryptoPool>,
        decryptor: Arc<KeyChainDecryptor>,
        signer_email: Option<String>,
    ) -> Self {
        Self {
            sizes: SizeAggregator::new(cache.clone()),
            remote,
            cache,
            pool,
            decryptor,
            signer_email,
        }
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> DriveResult<Arc<Node>> {
        let name = validate_name(name)?;
        let parent = self.folder_with_keys(parent_id)?;

        let spec = ChildSpec {
            id: uuid::Uuid::new_v4().to_string(),
            share_id: parent.share_id.clone(),
            parent_id: Some(parent.id.clone()),
            kind: NodeKind::Folder,
            name: name.clone(),
            size: 0,
            signer_email: self.signer_for(&parent.share_id),
            now: unix_now(),
        };
        let parent_keys = parent.keys.clone();
        let sealed = self
            .pool
            .run(move || seal_child(&parent_keys, &spec))
            .await??;
        let id = sealed.link.id.clone();

        let outcome = self
            .remote
            .create_folder(CreateFolderRequest {
                share_id: parent.share_id.clone(),
                link: sealed.link.clone(),
            })
            .await?;
        let (accepted, rejected) = settle(std::slice::from_ref(&id), outcome);
        if !accepted.contains(&id) {
            return Err(DriveError::batch_rejected("create", 1, accepted, rejected, |_| {
                Some(name.clone())
            }));
        }

        let details = NodeDetails::Folder(FolderState {
            loaded: true,
            ..FolderState::default()
        });
        let node = Node::from_link(&sealed.link, name.clone(), Arc::new(sealed.keys), details);
        self.cache.dispatch(CacheAction::AddNode(node));
        self.cache.dispatch(CacheAction::AppendChild {
            folder_id: parent.id.clone(),
            child_id: id.clone(),
        });
        info!(folder_id = %id, parent_id, "folder created");
        self.cache
            .get(&id)
            .ok_or_else(|| DriveError::NotFound(id.clone()))
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> DriveResult<Arc<Node>> {
        let new_name = validate_name(new_name)?;
        let node = self.node(id)?;
        if node.is_share() {
            return Err(DriveError::InvalidOperation("shares cannot be renamed".into()));
        }
        if node.name == new_name {
            return Ok(node);
        }
        let parent = self.parent_of(&node)?;

        let kind = node.kind;
        let node_public = node.keys.public_key();
        let parent_keys = parent.keys.clone();
        let name = new_name.clone();
        let (encrypted_name, hash) = self
            .pool
            .run(move || -> anyhow::Result<(String, String)> {
                let encrypted = if kind.name_uses_parent_key() {
                    encrypt_name_with_session(&parent_keys.session_key, &name)?
                } else {
                    encrypt_name_to(&node_public, &name)?
                };
                Ok((encrypted, name_hash(&parent_keys.session_key, &name)?))
            })
            .await??;

        let modified_at = unix_now();
        let outcome = self
            .remote
            .update_name(RenameRequest {
                share_id: node.share_id.clone(),
                link_id: id.to_string(),
                encrypted_name: encrypted_name.clone(),
                name_hash: hash.clone(),
                modified_at,
            })
            .await?;
        let (accepted, rejected) = settle(&[id.to_string()], outcome);
        if !accepted.iter().any(|a| a == id) {
            return self.finish("rename", 1, accepted, rejected).map(|_| node);
        }

        self.cache.dispatch(CacheAction::UpdateName {
            id: id.to_string(),
            name: new_name,
            encrypted_name,
            name_hash: hash,
            modified_at,
        });
        info!(node_id = id, "renamed");
        self.node(id)
    }

    /// Move items into `target_id`. Folders cannot move into themselves or a
    /// descendant; items already in the target are rejected.
    pub async fn move_items(&self, ids: &[String], target_id: &str) -> DriveResult<Vec<String>> {
        let ids = &unique(ids);
        let target = self.folder_with_keys(target_id)?;
        let target_ancestors = self.cache.ancestors(target_id);

        let mut rejected = Vec::new();
        let mut candidates = Vec::new();
        for id in ids {
            let Some(node) = self.cache.get(id) else {
                rejected.push(rejection(id, RejectReason::NotFound));
                continue;
            };
            if id == target_id || target_ancestors.contains(id) {
                rejected.push(rejection(id, RejectReason::SelfReferential));
            } else if node.is_share() || node.trashed {
                rejected.push(rejection(id, RejectReason::Invalid("item cannot be moved".into())));
            } else if node.parent_id.as_deref() == Some(target_id) {
                rejected.push(rejection(
                    id,
                    RejectReason::Invalid("already in the destination folder".into()),
                ));
            } else {
                candidates.push(node);
            }
        }

        let target_keys = target.keys.clone();
        let jobs: Vec<(String, NodeKind, String, String, Arc<KeyMaterial>)> = candidates
            .iter()
            .map(|n| (n.id.clone(), n.kind, n.name.clone(), n.encrypted_name.clone(), n.keys.clone()))
            .collect();
        let prepared = self
            .pool
            .run(move || {
                jobs.into_iter()
                    .map(|(id, kind, name, encrypted_name, keys)| {
                        prepare_move(id.clone(), kind, &name, encrypted_name, &keys, &target_keys)
                            .map_err(|e| (id, e))
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        let mut ready = Vec::new();
        for item in prepared {
            match item {
                Ok(p) => ready.push(p),
                Err((id, e)) => {
                    warn!(node_id = %id, error = %e, "could not re-wrap key for move");
                    rejected.push(rejection(&id, RejectReason::Invalid(e.to_string())));
                }
            }
        }
        if ready.is_empty() {
            return self.finish("move", ids.len(), Vec::new(), rejected);
        }

        let requested: Vec<String> = ready.iter().map(|p| p.id.clone()).collect();
        let outcome = self
            .remote
            .move_items(MoveRequest {
                share_id: target.share_id.clone(),
                target_id: target_id.to_string(),
                links: ready.iter().map(|p| p.link.clone()).collect(),
            })
            .await?;
        let (accepted, remote_rejected) = settle(&requested, outcome);
        rejected.extend(remote_rejected);

        for prepared in ready.into_iter().filter(|p| accepted.contains(&p.id)) {
            let Some(node) = self.cache.get(&prepared.id) else {
                continue;
            };
            let old_parent = node.parent_id.clone();
            self.cache.dispatch(CacheAction::Reparent {
                id: prepared.id.clone(),
                parent_id: target_id.to_string(),
                keys: Arc::new(prepared.keys),
                encrypted_name: prepared.link.encrypted_name,
                name_hash: prepared.link.name_hash,
                passphrase_signature: prepared.link.passphrase_signature,
            });
            let delta = size_delta(node.size);
            if let Some(old) = old_parent {
                self.sizes.propagate(&old, -delta);
            }
            self.sizes.propagate(target_id, delta);
        }
        self.finish("move", ids.len(), accepted, rejected)
    }

    pub async fn move_to_trash(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        let ids = &unique(ids);
        let mut rejected = Vec::new();
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for id in ids {
            let Some(node) = self.cache.get(id) else {
                rejected.push(rejection(id, RejectReason::NotFound));
                continue;
            };
            let parent = node.parent_id.clone().unwrap_or_default();
            let parent_is_share = self.cache.get(&parent).is_some_and(|p| p.is_share());
            if node.is_share() || parent_is_share {
                rejected.push(rejection(id, RejectReason::Invalid("a share root cannot be trashed".into())));
            } else if node.trashed {
                rejected.push(rejection(id, RejectReason::Invalid("already in the trash".into())));
            } else {
                groups
                    .entry((node.share_id.clone(), parent))
                    .or_default()
                    .push(id.clone());
            }
        }

        let group_count = groups.len();
        let mut transport_errors = Vec::new();
        let mut accepted_all = Vec::new();
        for ((share_id, parent_id), group) in groups {
            let outcome = match self.remote.trash_items(&share_id, &parent_id, &group).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(parent_id = %parent_id, error = %e, "trash call failed for group");
                    rejected.extend(unanswered(&group, &e));
                    transport_errors.push(e);
                    continue;
                }
            };
            let (accepted, remote_rejected) = settle(&group, outcome);
            rejected.extend(remote_rejected);

            let now = unix_now();
            for id in &accepted {
                let Some(node) = self.cache.get(id) else {
                    continue;
                };
                self.cache.dispatch(CacheAction::MarkTrashed {
                    id: id.clone(),
                    trashed_at: now,
                });
                self.sizes.propagate(&parent_id, -size_delta(node.size));
            }
            accepted_all.extend(accepted);
        }
        if let Some(e) = untouched(group_count, accepted_all.is_empty(), transport_errors) {
            return Err(e);
        }
        self.finish("trash", ids.len(), accepted_all, rejected)
    }

    /// Restore trashed items to their original parent. A same-named item
    /// in that parent is a `NameConflict`; nothing is renamed automatically.
    pub async fn restore_from_trash(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        let ids = &unique(ids);
        let mut rejected = Vec::new();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in ids {
            match self.cache.get(id) {
                None => rejected.push(rejection(id, RejectReason::NotFound)),
                Some(node) if !node.trashed => {
                    rejected.push(rejection(id, RejectReason::Invalid("not in the trash".into())))
                }
                Some(node) => groups.entry(node.share_id.clone()).or_default().push(id.clone()),
            }
        }

        let group_count = groups.len();
        let mut transport_errors = Vec::new();
        let mut accepted_all = Vec::new();
        for (share_id, group) in groups {
            let outcome = match self.remote.restore_items(&share_id, &group).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(share_id = %share_id, error = %e, "restore call failed for group");
                    rejected.extend(unanswered(&group, &e));
                    transport_errors.push(e);
                    continue;
                }
            };
            let (accepted, remote_rejected) = settle(&group, outcome);
            rejected.extend(remote_rejected);

            for id in &accepted {
                let Some(node) = self.cache.get(id) else {
                    continue;
                };
                let parent = self
                    .cache
                    .trash_entry(id)
                    .and_then(|e| e.original_parent_id)
                    .or_else(|| node.parent_id.clone());
                self.cache.dispatch(CacheAction::Restore { id: id.clone() });
                if let Some(parent) = parent {
                    self.sizes.propagate(&parent, size_delta(node.size));
                }
            }
            accepted_all.extend(accepted);
        }
        if let Some(e) = untouched(group_count, accepted_all.is_empty(), transport_errors) {
            return Err(e);
        }
        self.finish("restore", ids.len(), accepted_all, rejected)
    }

    /// Delete items for good, with everything cached below them.
    pub async fn permanently_delete(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        let ids = &unique(ids);
        let mut rejected = Vec::new();
        let mut targets = Vec::new();
        for id in ids {
            match self.cache.get(id) {
                Some(node) if !node.is_share() => targets.push(node),
                Some(_) => rejected.push(rejection(id, RejectReason::Invalid("shares cannot be deleted here".into()))),
                None => rejected.push(rejection(id, RejectReason::NotFound)),
            }
        }

        let calls = targets
            .iter()
            .map(|node| self.remote.delete_item(&node.share_id, &node.id));
        let outcomes = join_all(calls).await;

        let mut accepted_all = Vec::new();
        for (node, outcome) in targets.iter().zip(outcomes) {
            let (accepted, remote_rejected) = match outcome {
                Ok(outcome) => settle(std::slice::from_ref(&node.id), outcome),
                Err(e) => (Vec::new(), unanswered(std::slice::from_ref(&node.id), &e)),
            };
            rejected.extend(remote_rejected);
            if !accepted.contains(&node.id) {
                continue;
            }

            // an earlier target may have removed this one or changed its size
            if let Some(current) = self.cache.get(&node.id) {
                if !current.trashed {
                    if let Some(parent) = &current.parent_id {
                        self.sizes.propagate(parent, -size_delta(current.size));
                    }
                }
            }
            for below in self.cache.descendants(&node.id) {
                self.cache.dispatch(CacheAction::Remove { id: below });
            }
            self.cache.dispatch(CacheAction::Remove {
                id: node.id.clone(),
            });
            accepted_all.extend(accepted);
        }
        self.finish("delete", ids.len(), accepted_all, rejected)
    }

    /// Fetch and decrypt trashed items whose parents are cached.
    pub async fn load_trash(&self) -> DriveResult<Vec<Arc<Node>>> {
        let mut nodes = Vec::new();
        for share in self.cache.shares() {
            let links = self.remote.get_trash_items(&share.id).await?;
            let mut decrypts = Vec::new();
            for link in links {
                let parent = link
                    .parent_id
                    .as_deref()
                    .and_then(|p| self.cache.get(p));
                match parent {
                    Some(parent) => decrypts.push(self.decryptor.decrypt_link(link, parent.keys.clone())),
                    None => debug!(node_id = %link.id, "trashed item's parent is not cached, skipping"),
                }
            }
            for result in join_all(decrypts).await {
                match result {
                    Ok(node) => nodes.push(node),
                    Err(e) => warn!(error = %e, "trashed item failed to decrypt"),
                }
            }
        }
        nodes.sort_by(|a, b| b.trashed_at.cmp(&a.trashed_at).then_with(|| a.id.cmp(&b.id)));
        info!(count = nodes.len(), "trash loaded");
        Ok(nodes)
    }

    fn finish(
        &self,
        verb: &str,
        total: usize,
        accepted: Vec<String>,
        rejected: Vec<Rejection>,
    ) -> DriveResult<Vec<String>> {
        if rejected.is_empty() {
            info!(verb, count = accepted.len(), "mutation applied");
            return Ok(accepted);
        }
        warn!(verb, accepted = accepted.len(), rejected = rejected.len(), "mutation partly rejected");
        Err(DriveError::batch_rejected(verb, total, accepted, rejected, |id| {
            self.cache.get(id).map(|n| n.name.clone())
        }))
    }

    fn node(&self, id: &str) -> DriveResult<Arc<Node>> {
        self.cache
            .get(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    fn parent_of(&self, node: &Node) -> DriveResult<Arc<Node>> {
        let parent_id = node
            .parent_id
            .as_deref()
            .ok_or_else(|| DriveError::InvalidOperation(format!("{} has no parent", node.id)))?;
        self.node(parent_id)
    }

    fn folder_with_keys(&self, id: &str) -> DriveResult<Arc<Node>> {
        let node = self.node(id)?;
        if !node.is_folder() {
            return Err(DriveError::InvalidOperation(format!("{id} is not a folder")));
        }
        if node.trashed {
            return Err(DriveError::InvalidOperation(format!("{id} is in the trash")));
        }
        Ok(node)
    }

    fn signer_for(&self, share_id: &str) -> String {
        self.signer_email
            .clone()
            .or_else(|| {
                self.cache
                    .get(share_id)
                    .and_then(|s| s.share().map(|s| s.creator.clone()))
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("signer_email", &self.signer_email)
            .finish_non_exhaustive()
    }
}

fn prepare_move(
    id: String,
    kind: NodeKind,
    name: &str,
    encrypted_name: String,
    keys: &KeyMaterial,
    target: &KeyMaterial,
) -> anyhow::Result<PreparedMove> {
    let (new_keys, node_passphrase, passphrase_signature) = rewrap_for_parent(keys, target)?;
    let encrypted_name = if kind.name_uses_parent_key() {
        encrypt_name_with_session(&target.session_key, name)?
    } else {
        encrypted_name
    };
    let link = MovedLink {
        link_id: id.clone(),
        node_passphrase,
        passphrase_signature,
        encrypted_name,
        name_hash: name_hash(&target.session_key, name)?,
    };
    Ok(PreparedMove {
        id,
        keys: new_keys,
        link,
    })
}

fn validate_name(name: &str) -> DriveResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DriveError::InvalidOperation("name must not be empty".into()));
    }
    if trimmed.contains('/') {
        return Err(DriveError::InvalidOperation(format!("name {trimmed:?} contains '/'")));
    }
    Ok(trimmed.to_string())
}

/// Drop repeated ids, keeping first occurrences in order.
fn unique(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}

fn rejection(id: &str, reason: RejectReason) -> Rejection {
    Rejection {
        id: id.to_string(),
        reason,
    }
}

fn size_delta(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Rejections for a group whose remote call never produced an outcome.
fn unanswered(group: &[String], err: &DriveError) -> Vec<Rejection> {
    group
        .iter()
        .map(|id| rejection(id, RejectReason::Invalid(err.to_string())))
        .collect()
}

/// When every group's call failed in transport and nothing was applied, the
/// cache is unchanged and the first transport error is the result.
fn untouched(group_count: usize, nothing_accepted: bool, errors: Vec<DriveError>) -> Option<DriveError> {
    if group_count == 0 || !nothing_accepted || errors.len() != group_count {
        return None;
    }
    errors.into_iter().next()
}

/// Split a remote outcome into accepted ids and rejections. A blanket
/// `Failure` rejects every requested id with its reason.
///
/// Accepted ids are restricted to `requested`, deduplicated and kept in the
/// remote's order. Requested ids the remote says nothing about are rejected.
fn settle(requested: &[String], outcome: MutationOutcome) -> (Vec<String>, Vec<Rejection>) {
    let (reported, reported_rejections) = match outcome {
        MutationOutcome::Success { accepted_ids } => (accepted_ids, Vec::new()),
        MutationOutcome::PartialSuccess {
            accepted_ids,
            rejected,
        } => (accepted_ids, rejected),
        MutationOutcome::Failure { reason } => {
            let mut rejected: Vec<Rejection> = Vec::new();
            for id in requested {
                if !rejected.iter().any(|r| &r.id == id) {
                    rejected.push(rejection(id, RejectReason::Invalid(reason.clone())));
                }
            }
            return (Vec::new(), rejected);
        }
    };

    let mut accepted: Vec<String> = Vec::new();
    for id in reported {
        if !requested.contains(&id) {
            warn!(node_id = %id, "remote accepted an id that was not requested, ignoring");
        } else if !accepted.contains(&id) {
            accepted.push(id);
        }
    }

    let mut rejected: Vec<Rejection> = Vec::new();
    for r in reported_rejections {
        if requested.contains(&r.id)
            && !accepted.contains(&r.id)
            && !rejected.iter().any(|seen| seen.id == r.id)
        {
            rejected.push(r);
        }
    }
    for id in requested {
        if !accepted.contains(id) && !rejected.iter().any(|r| &r.id == id) {
            rejected.push(rejection(id, RejectReason::Invalid("no outcome reported".into())));
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Reports ").unwrap(), "Reports");
        assert!(validate_name("   ").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_settle_failure_rejects_all() {
        let (accepted, rejected) = settle(
            &["a".to_string(), "b".to_string()],
            MutationOutcome::Failure {
                reason: "quota exceeded".into(),
            },
        );
        assert!(accepted.is_empty());
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[1].reason, RejectReason::Invalid("quota exceeded".into()));
    }

    #[test]
    fn test_unique_keeps_first_occurrence() {
        let ids = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(unique(&ids), ["b", "a", "c"].map(String::from).to_vec());
    }

    #[test]
    fn test_settle_ignores_duplicate_and_unrequested_ids() {
        let (accepted, rejected) = settle(
            &["a".to_string()],
            MutationOutcome::Success {
                accepted_ids: vec!["a".into(), "a".into(), "zzz".into()],
            },
        );
        assert_eq!(accepted, vec!["a".to_string()]);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_settle_rejects_silently_dropped_ids() {
        let (accepted, rejected) = settle(
            &["a".to_string(), "b".to_string(), "c".to_string()],
            MutationOutcome::PartialSuccess {
                accepted_ids: vec!["a".into()],
                rejected: vec![
                    rejection("b", RejectReason::NameConflict),
                    rejection("b", RejectReason::NotFound),
                    rejection("other", RejectReason::NotFound),
                ],
            },
        );
        assert_eq!(accepted, vec!["a".to_string()]);
        let ids: Vec<&str> = rejected.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(rejected[0].reason, RejectReason::NameConflict);
    }

    #[test]
    fn test_untouched_only_when_every_group_failed() {
        let err = || DriveError::Network("reset".into());
        assert!(untouched(2, true, vec![err(), err()]).is_some());
        assert!(untouched(2, true, vec![err()]).is_none());
        assert!(untouched(1, false, vec![err()]).is_none());
        assert!(untouched(0, true, Vec::new()).is_none());
    }

    #[test]
    fn test_size_delta_clamps() {
        assert_eq!(size_delta(5), 5);
        assert_eq!(size_delta(u64::MAX), i64::MAX);
    }
}
