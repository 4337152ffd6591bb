//! cirrus-drive: the client engine of an end-to-end encrypted drive
//!
//! Nodes arrive from the remote as ciphertext. The engine decrypts them one
//! level at a time down the key hierarchy, caches the plaintext tree,
//! applies mutations with partial-success reconciliation and checks the
//! signature chain of what it shows.
//!
//! ```text
//! DriveClient
//!   ├── FolderLoader ──► KeyChainDecryptor ──► CryptoPool (rayon)
//!   ├── MutationCoordinator ──► SizeAggregator
//!   ├── IntegrityVerifier
//!   └── NodeCache (CacheAction dispatch + read-through projection)
//! ```

pub mod auth;
pub mod client;
pub mod envelope;
pub mod integrity;
pub mod keychain;
pub mod loader;
pub mod mutations;
pub mod node;
pub mod pool;
pub mod remote;
pub mod size;
pub mod store;

pub use auth::{authenticate, AuthSession};
pub use client::DriveClient;
pub use integrity::{IntegrityVerifier, TreeVerification};
pub use keychain::{DecryptFailure, KeyChainDecryptor};
pub use loader::{FolderLoader, LoadMode, LoadResult};
pub use mutations::MutationCoordinator;
pub use node::{KeyMaterial, Node, NodeDetails, Trust};
pub use pool::CryptoPool;
pub use remote::{MemoryRemote, TreeSeeder};
pub use size::SizeAggregator;
pub use store::{CacheAction, NodeCache};
