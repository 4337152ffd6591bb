//! Node cache: one authoritative store plus a read-through projection.
//!
//! The store is only ever changed through [`CacheAction`]s passed to
//! [`NodeCache::dispatch`]. Reads go through the projection, a map of
//! `Arc<Node>` snapshots that is backfilled on a miss and invalidated for
//! every id an action touches.
//!
//! Lock order is always store → projection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::node::{ErrorStats, KeyMaterial, Node, TrashEntry, Trust};

/// The closed set of cache mutations
#[derive(Debug)]
pub enum CacheAction {
    /// Insert or replace a decrypted node. A replaced folder keeps its
    /// child list; a trashed node goes straight to the trash index.
    AddNode(Node),
    SetChildren {
        folder_id: String,
        child_ids: Vec<String>,
        last_loaded_offset: u64,
        total_items: u64,
        total_pages: u64,
    },
    /// Append to a loaded folder's child list (no-op if not loaded).
    AppendChild { folder_id: String, child_id: String },
    MarkTrashed { id: String, trashed_at: u64 },
    Restore { id: String },
    Remove { id: String },
    UpdateSize { id: String, size: u64 },
    Reparent {
        id: String,
        parent_id: String,
        keys: Arc<KeyMaterial>,
        encrypted_name: String,
        name_hash: String,
        passphrase_signature: String,
    },
    UpdateName {
        id: String,
        name: String,
        encrypted_name: String,
        name_hash: String,
        modified_at: u64,
    },
    RecordError { id: String, message: String },
    RecordIntegrity { id: String, trust: Trust },
    Reset,
}

#[derive(Default)]
struct CacheState {
    nodes: HashMap<String, Node>,
    trash: HashMap<String, TrashEntry>,
    errors: HashMap<String, ErrorStats>,
}

/// Ids whose projection entries must be dropped
enum Touched {
    Ids(Vec<String>),
    All,
}

impl CacheState {
    fn apply(&mut self, action: CacheAction) -> Touched {
        match action {
            CacheAction::AddNode(mut node) => {
                let id = node.id.clone();
                if let Some(existing) = self.nodes.get(&id) {
                    if let (Some(old), Some(new)) = (existing.folder(), node.folder_mut()) {
                        *new = old.clone();
                    }
                }
                self.errors.remove(&id);
                let mut touched = vec![id.clone()];
                if node.trashed {
                    self.trash.insert(
                        id.clone(),
                        TrashEntry {
                            kind: node.kind,
                            original_parent_id: node.parent_id.clone(),
                            trashed_at: node.trashed_at.unwrap_or_default(),
                        },
                    );
                    if let Some(parent) = node.parent_id.clone() {
                        self.detach(&parent, &id);
                        touched.push(parent);
                    }
                } else {
                    self.trash.remove(&id);
                }
                self.nodes.insert(id, node);
                Touched::Ids(touched)
            }
            CacheAction::SetChildren {
                folder_id,
                child_ids,
                last_loaded_offset,
                total_items,
                total_pages,
            } => {
                if let Some(folder) = self.nodes.get_mut(&folder_id).and_then(Node::folder_mut) {
                    folder.child_ids = child_ids;
                    folder.loaded = true;
                    folder.last_loaded_offset = last_loaded_offset;
                    folder.total_items = total_items;
                    folder.total_pages = total_pages;
                }
                Touched::Ids(vec![folder_id])
            }
            CacheAction::AppendChild {
                folder_id,
                child_id,
            } => {
                self.attach(&folder_id, &child_id);
                Touched::Ids(vec![folder_id])
            }
            CacheAction::MarkTrashed { id, trashed_at } => {
                let Some(node) = self.nodes.get_mut(&id) else {
                    return Touched::Ids(vec![id]);
                };
                node.trashed = true;
                node.trashed_at = Some(trashed_at);
                let parent = node.parent_id.clone();
                self.trash.insert(
                    id.clone(),
                    TrashEntry {
                        kind: node.kind,
                        original_parent_id: parent.clone(),
                        trashed_at,
                    },
                );
                let mut touched = vec![id.clone()];
                if let Some(parent) = parent {
                    self.detach(&parent, &id);
                    touched.push(parent);
                }
                Touched::Ids(touched)
            }
            CacheAction::Restore { id } => {
                let entry = self.trash.remove(&id);
                let Some(node) = self.nodes.get_mut(&id) else {
                    return Touched::Ids(vec![id]);
                };
                node.trashed = false;
                node.trashed_at = None;
                let parent = entry
                    .and_then(|e| e.original_parent_id)
                    .or_else(|| node.parent_id.clone());
                node.parent_id = parent.clone();
                let mut touched = vec![id.clone()];
                if let Some(parent) = parent {
                    self.attach(&parent, &id);
                    touched.push(parent);
                }
                Touched::Ids(touched)
            }
            CacheAction::Remove { id } => {
                self.trash.remove(&id);
                self.errors.remove(&id);
                let mut touched = vec![id.clone()];
                if let Some(node) = self.nodes.remove(&id) {
                    if let Some(parent) = node.parent_id {
                        self.detach(&parent, &id);
                        touched.push(parent);
                    }
                }
                Touched::Ids(touched)
            }
            CacheAction::UpdateSize { id, size } => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.size = size;
                }
                Touched::Ids(vec![id])
            }
            CacheAction::Reparent {
                id,
                parent_id,
                keys,
                encrypted_name,
                name_hash,
                passphrase_signature,
            } => {
                let Some(node) = self.nodes.get_mut(&id) else {
                    return Touched::Ids(vec![id]);
                };
                let old_parent = node.parent_id.replace(parent_id.clone());
                node.keys = keys;
                node.encrypted_name = encrypted_name;
                node.name_hash = name_hash;
                node.signatures.passphrase_signature = passphrase_signature;
                node.trust = Trust::Unverified;
                let trashed = node.trashed;

                let mut touched = vec![id.clone(), parent_id.clone()];
                if let Some(old) = old_parent {
                    self.detach(&old, &id);
                    touched.push(old);
                }
                if !trashed {
                    self.attach(&parent_id, &id);
                }
                Touched::Ids(touched)
            }
            CacheAction::UpdateName {
                id,
                name,
                encrypted_name,
                name_hash,
                modified_at,
            } => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.name = name;
                    node.encrypted_name = encrypted_name;
                    node.name_hash = name_hash;
                    node.modified_at = modified_at;
                }
                Touched::Ids(vec![id])
            }
            CacheAction::RecordError { id, message } => {
                let stats = self.errors.entry(id.clone()).or_default();
                stats.count += 1;
                stats.last_message = message;
                Touched::Ids(vec![id])
            }
            CacheAction::RecordIntegrity { id, trust } => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.trust = trust;
                }
                Touched::Ids(vec![id])
            }
            CacheAction::Reset => {
                self.nodes.clear();
                self.trash.clear();
                self.errors.clear();
                Touched::All
            }
        }
    }

    fn attach(&mut self, folder_id: &str, child_id: &str) {
        if let Some(folder) = self.nodes.get_mut(folder_id).and_then(Node::folder_mut) {
            if folder.loaded && !folder.child_ids.iter().any(|c| c == child_id) {
                folder.child_ids.push(child_id.to_string());
            }
        }
    }

    fn detach(&mut self, folder_id: &str, child_id: &str) {
        if let Some(folder) = self.nodes.get_mut(folder_id).and_then(Node::folder_mut) {
            folder.child_ids.retain(|c| c != child_id);
        }
    }
}

#[derive(Default)]
pub struct NodeCache {
    state: RwLock<CacheState>,
    projection: RwLock<HashMap<String, Arc<Node>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one action to the store and invalidate what it touched.
    pub fn dispatch(&self, action: CacheAction) {
        let mut state = self.state.write();
        let touched = state.apply(action);
        let mut projection = self.projection.write();
        match touched {
            Touched::Ids(ids) => {
                for id in ids {
                    projection.remove(&id);
                }
            }
            Touched::All => projection.clear(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Node>> {
        if let Some(node) = self.projection.read().get(id) {
            debug!(node_id = id, "projection hit");
            return Some(node.clone());
        }
        // hold the store lock while backfilling so a concurrent dispatch
        // cannot slip in between read and insert
        let state = self.state.read();
        let node = Arc::new(state.nodes.get(id)?.clone());
        self.projection
            .write()
            .insert(id.to_string(), node.clone());
        Some(node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// Non-trashed children of a folder in display order.
    pub fn children(&self, folder_id: &str) -> Vec<Arc<Node>> {
        let Some(folder) = self.get(folder_id) else {
            return Vec::new();
        };
        folder
            .child_ids()
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|n| !n.trashed)
            .collect()
    }

    /// Every cached non-trashed node whose parent is `id`, loaded or not.
    pub fn live_children_of(&self, id: &str) -> Vec<Arc<Node>> {
        let ids: Vec<String> = self
            .state
            .read()
            .nodes
            .values()
            .filter(|n| !n.trashed && n.parent_id.as_deref() == Some(id))
            .map(|n| n.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Parent chain of `id`, nearest first. Stops at a missing node or a cycle.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let state = self.state.read();
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut current = state.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = state.nodes.get(&parent).and_then(|n| n.parent_id.clone());
            chain.push(parent);
        }
        chain
    }

    /// True if `candidate` is `id` itself or one of its ancestors.
    pub fn is_self_or_ancestor(&self, candidate: &str, id: &str) -> bool {
        candidate == id || self.ancestors(id).iter().any(|a| a == candidate)
    }

    /// Every cached node below `id`, trashed or not, breadth first.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let state = self.state.read();
        let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in state.nodes.values() {
            if let Some(parent) = node.parent_id.as_deref() {
                by_parent.entry(parent).or_default().push(node.id.as_str());
            }
        }

        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for &child in by_parent.get(current).into_iter().flatten() {
                if seen.insert(child) {
                    out.push(child.to_string());
                    queue.push_back(child);
                }
            }
        }
        out
    }

    pub fn shares(&self) -> Vec<Arc<Node>> {
        let ids: Vec<String> = self
            .state
            .read()
            .nodes
            .values()
            .filter(|n| n.is_share())
            .map(|n| n.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn trash_entry(&self, id: &str) -> Option<TrashEntry> {
        self.state.read().trash.get(id).cloned()
    }

    pub fn trashed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().trash.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Decryption failure statistics for one node.
    pub fn failure(&self, id: &str) -> Option<ErrorStats> {
        self.state.read().errors.get(id).cloned()
    }

    #[cfg(test)]
    fn projection_len(&self) -> usize {
        self.projection.read().len()
    }
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("NodeCache")
            .field("nodes", &state.nodes.len())
            .field("trash", &state.trash.len())
            .field("errors", &state.errors.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::node::{FolderState, NodeDetails, Signatures};
    use cirrus_core::types::NodeKind;
    use cirrus_crypto::{generate_session_key, KeyPacket, NodeKeyPair};

    pub(crate) fn test_keys() -> Arc<KeyMaterial> {
        let session_key = generate_session_key();
        let packet = KeyPacket::new(&session_key, None, "folder", 0);
        Arc::new(KeyMaterial {
            private_key: NodeKeyPair::generate(),
            session_key,
            packet,
            wrapped_passphrase: String::new(),
            content_key: None,
        })
    }

    pub(crate) fn test_node(id: &str, parent: Option<&str>, kind: NodeKind, size: u64) -> Node {
        let details = match kind {
            NodeKind::Folder => NodeDetails::Folder(FolderState::default()),
            NodeKind::File => NodeDetails::File(crate::node::FileState {
                revision_id: "rev".into(),
                content_key_packet: String::new(),
                thumbnail: None,
            }),
            NodeKind::Share => NodeDetails::Share(crate::node::ShareState {
                creator: "user@x.com".into(),
                root_link_id: "root".into(),
                is_primary: true,
            }),
        };
        Node {
            id: id.into(),
            parent_id: parent.map(str::to_string),
            share_id: "share1".into(),
            kind,
            name: format!("{id}-name"),
            encrypted_name: String::new(),
            name_hash: String::new(),
            created_at: 0,
            modified_at: 0,
            size,
            trashed: false,
            trashed_at: None,
            keys: test_keys(),
            signatures: Signatures::default(),
            trust: Trust::Unverified,
            details,
        }
    }

    fn loaded(cache: &NodeCache, folder: &str, children: &[&str]) {
        cache.dispatch(CacheAction::SetChildren {
            folder_id: folder.into(),
            child_ids: children.iter().map(|c| c.to_string()).collect(),
            last_loaded_offset: 0,
            total_items: children.len() as u64,
            total_pages: 1,
        });
    }

    #[test]
    fn test_projection_backfill_and_invalidate() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("f", None, NodeKind::File, 10)));
        assert_eq!(cache.projection_len(), 0);

        assert_eq!(cache.get("f").unwrap().size, 10);
        assert_eq!(cache.projection_len(), 1);

        cache.dispatch(CacheAction::UpdateSize {
            id: "f".into(),
            size: 20,
        });
        assert_eq!(cache.projection_len(), 0);
        assert_eq!(cache.get("f").unwrap().size, 20);
    }

    #[test]
    fn test_trash_and_restore_maintain_children() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("root", None, NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("a", Some("root"), NodeKind::File, 1)));
        cache.dispatch(CacheAction::AddNode(test_node("b", Some("root"), NodeKind::File, 1)));
        loaded(&cache, "root", &["a", "b"]);

        cache.dispatch(CacheAction::MarkTrashed {
            id: "a".into(),
            trashed_at: 99,
        });
        assert_eq!(cache.get("root").unwrap().child_ids(), &["b".to_string()]);
        let entry = cache.trash_entry("a").unwrap();
        assert_eq!(entry.original_parent_id.as_deref(), Some("root"));
        assert_eq!(entry.trashed_at, 99);

        cache.dispatch(CacheAction::Restore { id: "a".into() });
        assert!(cache.trash_entry("a").is_none());
        assert!(!cache.get("a").unwrap().trashed);
        assert_eq!(
            cache.get("root").unwrap().child_ids(),
            &["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_re_adding_folder_keeps_children() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("d", None, NodeKind::Folder, 0)));
        loaded(&cache, "d", &["x"]);

        cache.dispatch(CacheAction::AddNode(test_node("d", None, NodeKind::Folder, 0)));
        let d = cache.get("d").unwrap();
        assert!(d.is_loaded());
        assert_eq!(d.child_ids(), &["x".to_string()]);
    }

    #[test]
    fn test_reparent_moves_between_lists() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("src", None, NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("dst", None, NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("f", Some("src"), NodeKind::File, 5)));
        loaded(&cache, "src", &["f"]);
        loaded(&cache, "dst", &[]);

        cache.dispatch(CacheAction::Reparent {
            id: "f".into(),
            parent_id: "dst".into(),
            keys: test_keys(),
            encrypted_name: "enc".into(),
            name_hash: "hash".into(),
            passphrase_signature: "sig".into(),
        });
        assert!(cache.get("src").unwrap().child_ids().is_empty());
        assert_eq!(cache.get("dst").unwrap().child_ids(), &["f".to_string()]);
        assert_eq!(cache.get("f").unwrap().parent_id.as_deref(), Some("dst"));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("share1", None, NodeKind::Share, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("root", Some("share1"), NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("a", Some("root"), NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("b", Some("a"), NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("c", Some("b"), NodeKind::File, 0)));

        assert_eq!(cache.ancestors("c"), vec!["b", "a", "root", "share1"]);
        assert!(cache.is_self_or_ancestor("a", "c"));
        assert!(cache.is_self_or_ancestor("c", "c"));
        assert!(!cache.is_self_or_ancestor("c", "a"));

        let mut below = cache.descendants("a");
        below.sort();
        assert_eq!(below, vec!["b", "c"]);
    }

    #[test]
    fn test_error_stats_cleared_on_success() {
        let cache = NodeCache::new();
        for msg in ["first", "second"] {
            cache.dispatch(CacheAction::RecordError {
                id: "n".into(),
                message: msg.into(),
            });
        }
        let stats = cache.failure("n").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.last_message, "second");

        cache.dispatch(CacheAction::AddNode(test_node("n", None, NodeKind::File, 0)));
        assert!(cache.failure("n").is_none());
    }

    #[test]
    fn test_remove_and_reset() {
        let cache = NodeCache::new();
        cache.dispatch(CacheAction::AddNode(test_node("root", None, NodeKind::Folder, 0)));
        cache.dispatch(CacheAction::AddNode(test_node("a", Some("root"), NodeKind::File, 0)));
        loaded(&cache, "root", &["a"]);
        cache.get("a");

        cache.dispatch(CacheAction::Remove { id: "a".into() });
        assert!(cache.get("a").is_none());
        assert!(cache.get("root").unwrap().child_ids().is_empty());

        cache.dispatch(CacheAction::Reset);
        assert!(cache.is_empty());
        assert_eq!(cache.projection_len(), 0);
    }
}
