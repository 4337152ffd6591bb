//! Key-chain decryptor: turns wrapped descriptors into cached nodes.
//!
//! At most one decryption per node id is in flight. A second request for
//! the same id joins the pending one. Each decryption runs as its own tokio
//! task with a timeout, and removes itself from the registry when it settles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cirrus_core::types::{LinkDescriptor, ShareDescriptor};
use cirrus_core::{DriveError, DriveResult};
use cirrus_crypto::NodeKeyPair;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::envelope;
use crate::node::{KeyMaterial, Node};
use crate::pool::CryptoPool;
use crate::store::{CacheAction, NodeCache};

/// Why one node could not be decrypted. Cloneable so joined callers all
/// see the same failure.
#[derive(Debug, Clone)]
pub enum DecryptFailure {
    Crypto { node_id: String, message: String },
    TimedOut { node_id: String, after_secs: u64 },
}

impl std::fmt::Display for DecryptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptFailure::Crypto { message, .. } => f.write_str(message),
            DecryptFailure::TimedOut { after_secs, .. } => {
                write!(f, "timed out after {after_secs}s")
            }
        }
    }
}

impl From<DecryptFailure> for DriveError {
    fn from(failure: DecryptFailure) -> Self {
        match failure {
            DecryptFailure::Crypto { node_id, message } => DriveError::Decryption { node_id, message },
            DecryptFailure::TimedOut {
                node_id,
                after_secs,
            } => DriveError::Timeout {
                node_id,
                after_secs,
            },
        }
    }
}

type PendingDecrypt = Shared<BoxFuture<'static, Result<Arc<Node>, DecryptFailure>>>;

pub struct KeyChainDecryptor {
    cache: Arc<NodeCache>,
    pool: Arc<CryptoPool>,
    timeout: Duration,
    inflight: Arc<Mutex<HashMap<String, PendingDecrypt>>>,
}

impl KeyChainDecryptor {
    pub fn new(cache: Arc<NodeCache>, pool: Arc<CryptoPool>, timeout: Duration) -> Self {
        Self {
            cache,
            pool,
            timeout,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of decryptions currently pending.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Decrypt a folder or file with its parent's unlocked key material.
    pub async fn decrypt_link(
        &self,
        link: LinkDescriptor,
        parent: Arc<KeyMaterial>,
    ) -> DriveResult<Arc<Node>> {
        if let Some(node) = self.cached_current(&link) {
            return Ok(node);
        }
        let id = link.id.clone();
        self.run_once(id, move || envelope::open_child(&link, &parent))
            .await
    }

    /// Decrypt a share with the user's unlocked private key.
    pub async fn decrypt_share(
        &self,
        share: ShareDescriptor,
        user_key: Arc<NodeKeyPair>,
    ) -> DriveResult<Arc<Node>> {
        if let Some(node) = self.cached_current(&share.link) {
            return Ok(node);
        }
        let id = share.link.id.clone();
        self.run_once(id, move || envelope::open_share(&share, &user_key))
            .await
    }

    /// The cached node if it is already current for this descriptor.
    fn cached_current(&self, link: &LinkDescriptor) -> Option<Arc<Node>> {
        let node = self.cache.get(&link.id)?;
        if node.modified_at == link.modified_at && node.trashed == link.trashed {
            debug!(node_id = %link.id, "already decrypted, skipping");
            return Some(node);
        }
        None
    }

    async fn run_once<F>(&self, id: String, job: F) -> DriveResult<Arc<Node>>
    where
        F: FnOnce() -> anyhow::Result<Node> + Send + 'static,
    {
        let pending = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&id) {
                Some(existing) => {
                    debug!(node_id = %id, "joining in-flight decryption");
                    existing.clone()
                }
                None => {
                    let task = tokio::spawn(decrypt_task(
                        id.clone(),
                        job,
                        self.cache.clone(),
                        self.pool.clone(),
                        self.timeout,
                        self.inflight.clone(),
                    ));
                    let node_id = id.clone();
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(DecryptFailure::Crypto {
                                node_id,
                                message: format!("decryption task failed: {e}"),
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    inflight.insert(id, pending.clone());
                    pending
                }
            }
        };
        pending.await.map_err(DriveError::from)
    }
}

async fn decrypt_task<F>(
    id: String,
    job: F,
    cache: Arc<NodeCache>,
    pool: Arc<CryptoPool>,
    timeout: Duration,
    inflight: Arc<Mutex<HashMap<String, PendingDecrypt>>>,
) -> Result<Arc<Node>, DecryptFailure>
where
    F: FnOnce() -> anyhow::Result<Node> + Send + 'static,
{
    let outcome = match tokio::time::timeout(timeout, pool.run(job)).await {
        Ok(Ok(Ok(node))) => Ok(node),
        Ok(Ok(Err(e))) => Err(DecryptFailure::Crypto {
            node_id: id.clone(),
            message: format!("{e:#}"),
        }),
        Ok(Err(e)) => Err(DecryptFailure::Crypto {
            node_id: id.clone(),
            message: e.to_string(),
        }),
        Err(_) => Err(DecryptFailure::TimedOut {
            node_id: id.clone(),
            after_secs: timeout.as_secs(),
        }),
    };

    let result = match outcome {
        Ok(node) => {
            cache.dispatch(CacheAction::AddNode(node));
            cache.get(&id).ok_or_else(|| DecryptFailure::Crypto {
                node_id: id.clone(),
                message: "node vanished from cache after decryption".into(),
            })
        }
        Err(failure) => {
            warn!(node_id = %id, error = %failure, "node decryption failed");
            cache.dispatch(CacheAction::RecordError {
                id: id.clone(),
                message: failure.to_string(),
            });
            Err(failure)
        }
    };

    inflight.lock().remove(&id);
    result
}

impl std::fmt::Debug for KeyChainDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyChainDecryptor")
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_node;
    use cirrus_core::types::NodeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn decryptor(timeout: Duration) -> (Arc<NodeCache>, KeyChainDecryptor) {
        let cache = Arc::new(NodeCache::new());
        let pool = Arc::new(CryptoPool::new(2).unwrap());
        let decryptor = KeyChainDecryptor::new(cache.clone(), pool, timeout);
        (cache, decryptor)
    }

    #[tokio::test]
    async fn test_duplicate_requests_share_one_run() {
        let (cache, decryptor) = decryptor(Duration::from_secs(5));
        let runs = Arc::new(AtomicUsize::new(0));

        let job = |runs: Arc<AtomicUsize>| {
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                Ok::<_, anyhow::Error>(test_node("n1", None, NodeKind::File, 3))
            }
        };

        let (a, b) = tokio::join!(
            decryptor.run_once("n1".into(), job(runs.clone())),
            decryptor.run_once("n1".into(), job(runs.clone())),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().id, "n1");
        assert_eq!(b.unwrap().id, "n1");
        assert!(cache.contains("n1"));
        assert_eq!(decryptor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timeout_records_failure_and_evicts() {
        let (cache, decryptor) = decryptor(Duration::from_millis(50));

        let err = decryptor
            .run_once("slow".into(), || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(test_node("slow", None, NodeKind::File, 0))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::Timeout { ref node_id, .. } if node_id == "slow"));
        assert_eq!(decryptor.in_flight(), 0);
        assert_eq!(cache.failure("slow").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_failure_is_node_scoped() {
        let (cache, decryptor) = decryptor(Duration::from_secs(5));

        let (bad, good) = tokio::join!(
            decryptor.run_once("bad".into(), || anyhow::bail!("wrong parent key")),
            decryptor.run_once("good".into(), || Ok(test_node("good", None, NodeKind::File, 1))),
        );

        let bad = bad.unwrap_err();
        assert!(bad.is_node_scoped());
        assert!(bad.to_string().contains("wrong parent key"));
        assert!(good.is_ok());
        assert_eq!(cache.failure("bad").unwrap().last_message, "wrong parent key");
        assert!(cache.failure("good").is_none());
    }
}
