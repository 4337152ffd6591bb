use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use cirrus_core::types::{unix_now, NodeKind, ShareDescriptor};
use cirrus_crypto::NodeKeyPair;

use super::MemoryRemote;
use crate::envelope::{seal_child, seal_share, ChildSpec};
use crate::node::KeyMaterial;

/// Builds sealed trees into a `MemoryRemote`, keeping every node's keys so
/// children can be sealed under them.
pub struct TreeSeeder {
    remote: Arc<MemoryRemote>,
    keys: HashMap<String, (String, KeyMaterial)>,
    signer: String,
}

impl TreeSeeder {
    pub fn new(remote: Arc<MemoryRemote>, signer: &str) -> Self {
        Self {
            remote,
            keys: HashMap::new(),
            signer: signer.to_string(),
        }
    }

    /// Sign everything seeded from now on as `signer`.
    pub fn signed_by(&mut self, signer: &str) -> &mut Self {
        self.signer = signer.to_string();
        self
    }

    /// Seal a primary share for `user_key` with an empty root folder.
    pub fn share(
        &mut self,
        user_key: &NodeKeyPair,
        share_id: &str,
        root_id: &str,
    ) -> anyhow::Result<&mut Self> {
        let now = unix_now();
        let share = seal_share(user_key, share_id, "My files", &self.signer, now)?;
        let root = seal_child(
            &share.keys,
            &ChildSpec {
                id: root_id.to_string(),
                share_id: share_id.to_string(),
                parent_id: None,
                kind: NodeKind::Folder,
                name: "root".into(),
                size: 0,
                signer_email: self.signer.clone(),
                now,
            },
        )?;

        self.remote.insert_share(ShareDescriptor {
            link: share.link,
            root_link_id: root_id.to_string(),
            creator: self.signer.clone(),
            is_primary: true,
        });
        self.remote.insert_link(root.link);
        self.keys
            .insert(share_id.to_string(), (share_id.to_string(), share.keys));
        self.keys
            .insert(root_id.to_string(), (share_id.to_string(), root.keys));
        Ok(self)
    }

    pub fn folder(&mut self, parent_id: &str, id: &str, name: &str) -> anyhow::Result<&mut Self> {
        self.child(parent_id, id, NodeKind::Folder, name, 0)
    }

    pub fn file(
        &mut self,
        parent_id: &str,
        id: &str,
        name: &str,
        size: u64,
    ) -> anyhow::Result<&mut Self> {
        self.child(parent_id, id, NodeKind::File, name, size)
    }

    fn child(
        &mut self,
        parent_id: &str,
        id: &str,
        kind: NodeKind,
        name: &str,
        size: u64,
    ) -> anyhow::Result<&mut Self> {
        let (share_id, parent) = self
            .keys
            .get(parent_id)
            .with_context(|| format!("parent {parent_id} was not seeded"))?;
        let share_id = share_id.clone();
        let sealed = seal_child(
            parent,
            &ChildSpec {
                id: id.to_string(),
                share_id: share_id.clone(),
                parent_id: Some(parent_id.to_string()),
                kind,
                name: name.to_string(),
                size,
                signer_email: self.signer.clone(),
                now: unix_now(),
            },
        )?;
        self.remote.insert_link(sealed.link);
        self.keys.insert(id.to_string(), (share_id, sealed.keys));
        Ok(self)
    }
}

impl std::fmt::Debug for TreeSeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSeeder")
            .field("nodes", &self.keys.len())
            .field("signer", &self.signer)
            .finish()
    }
}
