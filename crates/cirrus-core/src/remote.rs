//! Remote authority interfaces.
//!
//! The transport is provided by the embedding application; the engine only
//! needs these semantics. Implementations must map transport failures to
//! `DriveError::Network`.

use async_trait::async_trait;

use crate::error::DriveResult;
use crate::types::{
    AuthInfo, AuthResponse, CreateFolderRequest, FolderPage, LinkDescriptor, MoveRequest,
    MutationOutcome, RenameRequest, ShareDescriptor, ShareSummary,
};

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get_shares(&self) -> DriveResult<Vec<ShareSummary>>;

    async fn get_share_by_id(&self, share_id: &str) -> DriveResult<ShareDescriptor>;

    async fn get_link_details(&self, node_id: &str, share_id: &str) -> DriveResult<LinkDescriptor>;

    async fn get_folder_contents(
        &self,
        folder_id: &str,
        share_id: &str,
        offset: u64,
        limit: u64,
    ) -> DriveResult<FolderPage>;

    async fn create_folder(&self, request: CreateFolderRequest) -> DriveResult<MutationOutcome>;

    async fn update_name(&self, request: RenameRequest) -> DriveResult<MutationOutcome>;

    async fn move_items(&self, request: MoveRequest) -> DriveResult<MutationOutcome>;

    async fn trash_items(
        &self,
        share_id: &str,
        parent_id: &str,
        ids: &[String],
    ) -> DriveResult<MutationOutcome>;

    async fn restore_items(&self, share_id: &str, ids: &[String]) -> DriveResult<MutationOutcome>;

    async fn delete_item(&self, share_id: &str, id: &str) -> DriveResult<MutationOutcome>;

    async fn get_trash_items(&self, share_id: &str) -> DriveResult<Vec<LinkDescriptor>>;
}

/// Server side of the SRP exchange
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn auth_info(&self, identity: &str) -> DriveResult<AuthInfo>;

    async fn authenticate(
        &self,
        session_id: &str,
        client_public: &str,
        client_proof: &str,
    ) -> DriveResult<AuthResponse>;
}
