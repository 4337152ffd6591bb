//! The drive client: one object wiring the cache, decryptor, loader,
//! mutations, integrity checks and crypto pool together.

use std::sync::Arc;

use cirrus_core::config::CirrusConfig;
use cirrus_core::remote::RemoteApi;
use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::NodeKeyPair;
use tokio::task::JoinHandle;
use tracing::info;

use crate::integrity::{IntegrityVerifier, TreeVerification};
use crate::keychain::KeyChainDecryptor;
use crate::loader::{FolderLoader, LoadMode, LoadResult};
use crate::mutations::MutationCoordinator;
use crate::node::Node;
use crate::pool::CryptoPool;
use crate::size::SizeAggregator;
use crate::store::{CacheAction, NodeCache};

pub struct DriveClient {
    remote: Arc<dyn RemoteApi>,
    user_key: Arc<NodeKeyPair>,
    cache: Arc<NodeCache>,
    pool: Arc<CryptoPool>,
    decryptor: Arc<KeyChainDecryptor>,
    loader: Arc<FolderLoader>,
    mutations: MutationCoordinator,
    integrity: IntegrityVerifier,
    sizes: SizeAggregator,
}

impl DriveClient {
    /// Build a client for the holder of `user_key`. Nothing is fetched
    /// until [`DriveClient::bootstrap_root`].
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        user_key: NodeKeyPair,
        config: &CirrusConfig,
    ) -> DriveResult<Self> {
        let cache = Arc::new(NodeCache::new());
        let pool = Arc::new(CryptoPool::new(config.workers.threads)?);
        let decryptor = Arc::new(KeyChainDecryptor::new(
            cache.clone(),
            pool.clone(),
            config.cache.decrypt_timeout(),
        ));
        let loader = Arc::new(FolderLoader::new(
            remote.clone(),
            cache.clone(),
            decryptor.clone(),
            config.cache.fresh_window(),
            config.cache.page_size,
        ));
        let mutations = MutationCoordinator::new(
            remote.clone(),
            cache.clone(),
            pool.clone(),
            decryptor.clone(),
            config.client.signer_email.clone(),
        );
        let integrity = IntegrityVerifier::new(cache.clone(), pool.clone(), config.workers.batch_size);
        let sizes = SizeAggregator::new(cache.clone());

        Ok(Self {
            remote,
            user_key: Arc::new(user_key),
            cache,
            pool,
            decryptor,
            loader,
            mutations,
            integrity,
            sizes,
        })
    }

    /// Resolve the primary share, decrypt it with the user key, then
    /// decrypt its root folder with the share key. Returns the root folder.
    pub async fn bootstrap_root(&self) -> DriveResult<Arc<Node>> {
        let shares = self.remote.get_shares().await?;
        let primary = shares
            .iter()
            .find(|s| s.is_primary)
            .ok_or_else(|| DriveError::NotFound("primary share".into()))?;

        let descriptor = self.remote.get_share_by_id(&primary.share_id).await?;
        let share = self
            .decryptor
            .decrypt_share(descriptor, self.user_key.clone())
            .await?;

        let root_link = self
            .remote
            .get_link_details(&primary.root_link_id, &share.id)
            .await?;
        let root = self
            .decryptor
            .decrypt_link(root_link, share.keys.clone())
            .await?;

        // the share stands above its root, so it carries the root's size
        self.cache.dispatch(CacheAction::UpdateSize {
            id: share.id.clone(),
            size: root.size,
        });
        info!(share_id = %share.id, root_id = %root.id, "root bootstrapped");
        Ok(root)
    }

    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.cache.get(id)
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    pub async fn load_children(
        &self,
        folder_id: &str,
        offset: u64,
        limit: u64,
        mode: LoadMode,
    ) -> DriveResult<LoadResult> {
        self.loader.load_children(folder_id, offset, limit, mode).await
    }

    pub async fn get_folder_children(&self, folder_id: &str) -> DriveResult<Vec<Arc<Node>>> {
        self.loader.get_folder_children(folder_id).await
    }

    pub fn refresh_in_background(&self, folder_id: &str) -> Option<JoinHandle<()>> {
        self.loader.refresh_in_background(folder_id)
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> DriveResult<Arc<Node>> {
        self.mutations.create_folder(parent_id, name).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> DriveResult<Arc<Node>> {
        self.mutations.rename(id, name).await
    }

    pub async fn move_items(&self, ids: &[String], target_id: &str) -> DriveResult<Vec<String>> {
        self.mutations.move_items(ids, target_id).await
    }

    pub async fn move_to_trash(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        self.mutations.move_to_trash(ids).await
    }

    pub async fn restore_from_trash(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        self.mutations.restore_from_trash(ids).await
    }

    pub async fn permanently_delete(&self, ids: &[String]) -> DriveResult<Vec<String>> {
        self.mutations.permanently_delete(ids).await
    }

    pub async fn load_trash(&self) -> DriveResult<Vec<Arc<Node>>> {
        self.mutations.load_trash().await
    }

    pub async fn verify(&self, id: &str) -> DriveResult<bool> {
        self.integrity.verify(id).await
    }

    pub async fn verify_tree(&self, folder_id: &str) -> DriveResult<TreeVerification> {
        self.integrity.verify_tree(folder_id).await
    }

    /// Size of `id` recomputed from the cached files below it.
    pub fn recursive_size(&self, id: &str) -> u64 {
        self.sizes.recursive_size(id)
    }

    /// Stop the crypto pool and drop every cached node.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.cache.dispatch(CacheAction::Reset);
        info!("drive client shut down");
    }
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("cache", &self.cache)
            .field("threads", &self.pool.threads())
            .field("decrypts_in_flight", &self.decryptor.in_flight())
            .finish_non_exhaustive()
    }
}
