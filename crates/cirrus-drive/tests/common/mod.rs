//! Shared fixture: a seeded in-memory remote and a bootstrapped client.
//!
//! ```text
//! share1
//! └── root123 (root)
//!     ├── folderA "Folder A"
//!     │   ├── file1 "notes.txt" (100)
//!     │   ├── file2 "photo.jpg" (250)
//!     │   └── folderB "Folder B"
//!     │       └── file3 "deep.bin" (50)
//!     └── file4 "top.txt" (10)
//! ```

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cirrus_core::config::CirrusConfig;
use cirrus_core::remote::RemoteApi;
use cirrus_core::types::{
    CreateFolderRequest, FolderPage, LinkDescriptor, MoveRequest, MutationOutcome, RenameRequest,
    ShareDescriptor, ShareSummary,
};
use cirrus_core::{DriveError, DriveResult};
use parking_lot::Mutex;
use cirrus_crypto::NodeKeyPair;
use cirrus_drive::{DriveClient, MemoryRemote, TreeSeeder};

pub const SIGNER: &str = "user@x.com";

pub struct Fixture {
    pub remote: Arc<MemoryRemote>,
    pub faults: Arc<FaultyRemote>,
    pub seeder: TreeSeeder,
    pub user_key: NodeKeyPair,
    pub client: DriveClient,
}

impl Fixture {
    /// Another client for the same user, with an empty cache.
    pub async fn second_client(&self) -> DriveClient {
        let client = DriveClient::new(self.faults.clone(), self.user_key.clone(), &config())
            .expect("second client");
        client.bootstrap_root().await.expect("bootstrap");
        client
    }
}

pub fn config() -> CirrusConfig {
    let mut config = CirrusConfig::default();
    config.workers.threads = 2;
    config
}

pub async fn fixture() -> Fixture {
    fixture_with(MemoryRemote::new()).await
}

pub async fn slow_fixture(latency: Duration) -> Fixture {
    fixture_with(MemoryRemote::new().with_latency(latency)).await
}

async fn fixture_with(remote: MemoryRemote) -> Fixture {
    let remote = Arc::new(remote);
    let user_key = NodeKeyPair::generate();

    let mut seeder = TreeSeeder::new(remote.clone(), SIGNER);
    seeder
        .share(&user_key, "share1", "root123")
        .and_then(|s| s.folder("root123", "folderA", "Folder A"))
        .and_then(|s| s.file("folderA", "file1", "notes.txt", 100))
        .and_then(|s| s.file("folderA", "file2", "photo.jpg", 250))
        .and_then(|s| s.folder("folderA", "folderB", "Folder B"))
        .and_then(|s| s.file("folderB", "file3", "deep.bin", 50))
        .and_then(|s| s.file("root123", "file4", "top.txt", 10))
        .expect("seed tree");

    let faults = Arc::new(FaultyRemote::new(remote.clone()));
    let client = DriveClient::new(faults.clone(), user_key.clone(), &config()).expect("client");
    client.bootstrap_root().await.expect("bootstrap");
    Fixture {
        remote,
        faults,
        seeder,
        user_key,
        client,
    }
}

/// Load every seeded folder into the client's cache.
pub async fn load_tree(client: &DriveClient) {
    for folder in ["root123", "folderA", "folderB"] {
        client
            .get_folder_children(folder)
            .await
            .unwrap_or_else(|e| panic!("loading {folder}: {e}"));
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn child_names(client: &DriveClient, folder: &str) -> Vec<String> {
    client
        .cache()
        .children(folder)
        .iter()
        .map(|n| n.name.clone())
        .collect()
}

/// Wraps the in-memory remote and misbehaves on request: failing trash calls
/// for one parent in transport, or echoing accepted ids twice.
pub struct FaultyRemote {
    inner: Arc<MemoryRemote>,
    unreachable_parent: Mutex<Option<String>>,
    echo_accepted: AtomicBool,
}

impl FaultyRemote {
    pub fn new(inner: Arc<MemoryRemote>) -> Self {
        Self {
            inner,
            unreachable_parent: Mutex::new(None),
            echo_accepted: AtomicBool::new(false),
        }
    }

    /// Fail every `trash_items` call for `parent_id` with a network error.
    pub fn drop_trash_calls_for(&self, parent_id: &str) {
        *self.unreachable_parent.lock() = Some(parent_id.to_string());
    }

    /// Report every accepted id twice.
    pub fn echo_accepted_ids(&self) {
        self.echo_accepted.store(true, Ordering::SeqCst);
    }

    fn doctor(&self, outcome: MutationOutcome) -> MutationOutcome {
        if !self.echo_accepted.load(Ordering::SeqCst) {
            return outcome;
        }
        let echo = |ids: Vec<String>| ids.iter().chain(ids.iter()).cloned().collect();
        match outcome {
            MutationOutcome::Success { accepted_ids } => MutationOutcome::Success {
                accepted_ids: echo(accepted_ids),
            },
            MutationOutcome::PartialSuccess {
                accepted_ids,
                rejected,
            } => MutationOutcome::PartialSuccess {
                accepted_ids: echo(accepted_ids),
                rejected,
            },
            failure => failure,
        }
    }
}

#[async_trait]
impl RemoteApi for FaultyRemote {
    async fn get_shares(&self) -> DriveResult<Vec<ShareSummary>> {
        self.inner.get_shares().await
    }

    async fn get_share_by_id(&self, share_id: &str) -> DriveResult<ShareDescriptor> {
        self.inner.get_share_by_id(share_id).await
    }

    async fn get_link_details(&self, node_id: &str, share_id: &str) -> DriveResult<LinkDescriptor> {
        self.inner.get_link_details(node_id, share_id).await
    }

    async fn get_folder_contents(
        &self,
        folder_id: &str,
        share_id: &str,
        offset: u64,
        limit: u64,
    ) -> DriveResult<FolderPage> {
        self.inner
            .get_folder_contents(folder_id, share_id, offset, limit)
            .await
    }

    async fn create_folder(&self, request: CreateFolderRequest) -> DriveResult<MutationOutcome> {
        self.inner.create_folder(request).await.map(|o| self.doctor(o))
    }

    async fn update_name(&self, request: RenameRequest) -> DriveResult<MutationOutcome> {
        self.inner.update_name(request).await.map(|o| self.doctor(o))
    }

    async fn move_items(&self, request: MoveRequest) -> DriveResult<MutationOutcome> {
        self.inner.move_items(request).await.map(|o| self.doctor(o))
    }

    async fn trash_items(
        &self,
        share_id: &str,
        parent_id: &str,
        ids: &[String],
    ) -> DriveResult<MutationOutcome> {
        if self.unreachable_parent.lock().as_deref() == Some(parent_id) {
            return Err(DriveError::Network("connection reset".into()));
        }
        self.inner
            .trash_items(share_id, parent_id, ids)
            .await
            .map(|o| self.doctor(o))
    }

    async fn restore_items(&self, share_id: &str, ids: &[String]) -> DriveResult<MutationOutcome> {
        self.inner.restore_items(share_id, ids).await.map(|o| self.doctor(o))
    }

    async fn delete_item(&self, share_id: &str, id: &str) -> DriveResult<MutationOutcome> {
        self.inner.delete_item(share_id, id).await.map(|o| self.doctor(o))
    }

    async fn get_trash_items(&self, share_id: &str) -> DriveResult<Vec<LinkDescriptor>> {
        self.inner.get_trash_items(share_id).await
    }
}
