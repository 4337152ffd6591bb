//! Folder content loader: fetch a page, decrypt the children, merge into the cache.
//!
//! One real fetch per (folder, offset) may be in flight; a duplicate call
//! fails fast with `Busy`. A page fetched within the freshness window is
//! answered from the cache without touching the remote.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cirrus_core::remote::RemoteApi;
use cirrus_core::{DriveError, DriveResult};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::keychain::KeyChainDecryptor;
use crate::node::Node;
use crate::store::{CacheAction, NodeCache};

/// How a fetched page combines with the cached child list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Keep existing order, append ids not seen before.
    Append,
    /// Like `Append`, but when the page is the whole folder, ids missing
    /// from it are dropped.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub success: bool,
    pub has_more: bool,
    pub total_items: u64,
    pub total_pages: u64,
}

type PageKey = (String, u64);

/// Removes its (folder, offset) from the in-flight set on drop.
struct InflightGuard<'a> {
    set: &'a Mutex<HashSet<PageKey>>,
    key: PageKey,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

pub struct FolderLoader {
    remote: Arc<dyn RemoteApi>,
    cache: Arc<NodeCache>,
    decryptor: Arc<KeyChainDecryptor>,
    inflight: Mutex<HashSet<PageKey>>,
    fetched_at: Mutex<HashMap<PageKey, (Instant, LoadResult)>>,
    fresh_window: Duration,
    page_size: u64,
}

impl FolderLoader {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        cache: Arc<NodeCache>,
        decryptor: Arc<KeyChainDecryptor>,
        fresh_window: Duration,
        page_size: u64,
    ) -> Self {
        Self {
            remote,
            cache,
            decryptor,
            inflight: Mutex::new(HashSet::new()),
            fetched_at: Mutex::new(HashMap::new()),
            fresh_window,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Load one page of a folder's children into the cache.
    pub async fn load_children(
        &self,
        folder_id: &str,
        offset: u64,
        limit: u64,
        mode: LoadMode,
    ) -> DriveResult<LoadResult> {
        self.load_page(folder_id, offset, limit, mode, false).await
    }

    /// All children of a folder, loading every page on first access.
    pub async fn get_folder_children(&self, folder_id: &str) -> DriveResult<Vec<Arc<Node>>> {
        let folder = self.folder(folder_id)?;
        if !folder.is_loaded() {
            let mut offset = 0;
            let mut mode = LoadMode::Replace;
            loop {
                let result = self.load_children(folder_id, offset, self.page_size, mode).await?;
                if !result.has_more {
                    break;
                }
                offset = offset.saturating_add(self.page_size);
                mode = LoadMode::Append;
            }
        }
        Ok(self.cache.children(folder_id))
    }

    /// Re-fetch the first page of a loaded folder on a background task.
    ///
    /// This is the only automatic retry. Failures are logged, not returned.
    pub fn refresh_in_background(self: &Arc<Self>, folder_id: &str) -> Option<JoinHandle<()>> {
        let folder = self.cache.get(folder_id)?;
        if !folder.is_loaded() {
            return None;
        }
        let loader = self.clone();
        let folder_id = folder_id.to_string();
        Some(tokio::spawn(async move {
            let limit = loader.page_size;
            match loader
                .load_page(&folder_id, 0, limit, LoadMode::Replace, true)
                .await
            {
                Ok(result) => debug!(folder_id = %folder_id, total = result.total_items, "background refresh done"),
                Err(e) => warn!(folder_id = %folder_id, error = %e, "background refresh failed"),
            }
        }))
    }

    /// Forget freshness so the next load goes to the remote.
    pub fn invalidate(&self, folder_id: &str) {
        self.fetched_at.lock().retain(|(id, _), _| id != folder_id);
    }

    fn folder(&self, folder_id: &str) -> DriveResult<Arc<Node>> {
        let node = self
            .cache
            .get(folder_id)
            .ok_or_else(|| DriveError::NotFound(folder_id.to_string()))?;
        if !node.is_folder() {
            return Err(DriveError::InvalidOperation(format!(
                "{folder_id} is a {}, not a folder",
                node.kind
            )));
        }
        Ok(node)
    }

    fn fresh(&self, key: &PageKey) -> Option<LoadResult> {
        let fetched = self.fetched_at.lock();
        let (at, result) = fetched.get(key)?;
        (at.elapsed() < self.fresh_window).then_some(*result)
    }

    async fn load_page(
        &self,
        folder_id: &str,
        offset: u64,
        limit: u64,
        mode: LoadMode,
        force: bool,
    ) -> DriveResult<LoadResult> {
        let folder = self.folder(folder_id)?;
        let key: PageKey = (folder_id.to_string(), offset);

        if !force && folder.is_loaded() {
            if let Some(result) = self.fresh(&key) {
                debug!(folder_id, offset, "page is fresh, serving from cache");
                return Ok(result);
            }
        }

        let _guard = {
            let mut inflight = self.inflight.lock();
            if !inflight.insert(key.clone()) {
                return Err(DriveError::Busy {
                    folder_id: folder_id.to_string(),
                    offset,
                });
            }
            InflightGuard {
                set: &self.inflight,
                key: key.clone(),
            }
        };

        let limit = limit.max(1);
        let page = self
            .remote
            .get_folder_contents(folder_id, &folder.share_id, offset, limit)
            .await?;
        let total_items = page.pagination.total_items;
        let fetched = page.items.len() as u64;

        // children decrypt in parallel; one failure never cancels a sibling
        let parent_keys = folder.keys.clone();
        let decrypts = page
            .items
            .into_iter()
            .filter(|link| !link.trashed)
            .map(|link| self.decryptor.decrypt_link(link, parent_keys.clone()));
        let mut page_ids = Vec::new();
        let mut failed = 0usize;
        for result in join_all(decrypts).await {
            match result {
                Ok(node) => page_ids.push(node.id.clone()),
                Err(e) => {
                    failed += 1;
                    warn!(folder_id, error = %e, "skipping child that failed to decrypt");
                }
            }
        }

        let has_more = offset.saturating_add(fetched) < total_items;
        let current = self.folder(folder_id)?;
        let whole_folder = offset == 0 && !has_more;
        let child_ids = merge_children(
            current.child_ids(),
            &page_ids,
            mode == LoadMode::Replace && whole_folder,
        );
        let total_pages = total_items.div_ceil(limit);

        self.cache.dispatch(CacheAction::SetChildren {
            folder_id: folder_id.to_string(),
            child_ids,
            last_loaded_offset: offset,
            total_items,
            total_pages,
        });

        let result = LoadResult {
            success: true,
            has_more,
            total_items,
            total_pages,
        };
        self.fetched_at.lock().insert(key, (Instant::now(), result));
        info!(folder_id, offset, loaded = page_ids.len(), failed, has_more, "folder page loaded");
        Ok(result)
    }
}

/// Stable merge: cached order first, then new ids in server order.
///
/// With `authoritative`, cached ids absent from the page are dropped.
fn merge_children(existing: &[String], page: &[String], authoritative: bool) -> Vec<String> {
    let on_page: HashSet<&str> = page.iter().map(String::as_str).collect();
    let mut merged: Vec<String> = existing
        .iter()
        .filter(|id| !authoritative || on_page.contains(id.as_str()))
        .cloned()
        .collect();
    let mut seen: HashSet<String> = merged.iter().cloned().collect();
    for id in page {
        if seen.insert(id.clone()) {
            merged.push(id.clone());
        }
    }
    merged
}

impl std::fmt::Debug for FolderLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderLoader")
            .field("page_size", &self.page_size)
            .field("fresh_window", &self.fresh_window)
            .field("in_flight", &self.inflight.lock().len())
            .finish()
    }
}
