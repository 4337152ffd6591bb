//! Crypto worker pool.
//!
//! Key unwrapping, name decryption and signature checks are CPU-bound. They
//! run on a dedicated rayon pool so the tokio runtime never blocks; results
//! come back over oneshot channels.
//!
//! Jobs are spawned FIFO. A panicking job fails only its own callers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cirrus_core::{DriveError, DriveResult};
use tokio::sync::oneshot;
use tracing::{debug, info};

pub struct CryptoPool {
    pool: rayon::ThreadPool,
    threads: usize,
    closed: AtomicBool,
}

impl CryptoPool {
    /// `parallelism` of 0 means one worker per available core.
    pub fn new(parallelism: usize) -> DriveResult<Self> {
        let threads = if parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            parallelism
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cirrus-crypto-{i}"))
            .build()
            .map_err(|e| DriveError::Other(anyhow::anyhow!("building crypto pool: {e}")))?;
        info!(threads, "crypto pool ready");
        Ok(Self {
            pool,
            threads,
            closed: AtomicBool::new(false),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work. Jobs already queued still complete.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("crypto pool shut down");
        }
    }

    fn ensure_open(&self) -> DriveResult<()> {
        if self.is_shut_down() {
            return Err(DriveError::InvalidOperation(
                "crypto pool is shut down".into(),
            ));
        }
        Ok(())
    }

    /// Run one job on a worker and await its result.
    pub async fn run<F, T>(&self, job: F) -> DriveResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.pool.spawn_fifo(move || {
            let _ = tx.send(catch_unwind(AssertUnwindSafe(job)));
        });
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(DriveError::Other(anyhow::anyhow!("crypto job panicked"))),
            Err(_) => Err(DriveError::Other(anyhow::anyhow!(
                "crypto worker dropped the job"
            ))),
        }
    }

    /// Apply `f` to every item, `chunk_size` items per worker job.
    ///
    /// Results come back in input order. If a chunk's job dies, every item
    /// of that chunk gets an error; other chunks are unaffected.
    pub async fn run_batch<I, T, F>(
        &self,
        items: Vec<I>,
        chunk_size: usize,
        f: F,
    ) -> Vec<DriveResult<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        if let Err(e) = self.ensure_open() {
            return items
                .iter()
                .map(|_| Err(DriveError::InvalidOperation(e.to_string())))
                .collect();
        }

        let chunk_size = chunk_size.max(1);
        let f = Arc::new(f);
        let mut pending = Vec::new();
        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<I> = iter.by_ref().take(chunk_size).collect();
            let len = chunk.len();
            let f = f.clone();
            let (tx, rx) = oneshot::channel();
            self.pool.spawn_fifo(move || {
                let results = catch_unwind(AssertUnwindSafe(|| {
                    chunk.into_iter().map(|item| (*f)(item)).collect::<Vec<_>>()
                }));
                let _ = tx.send(results);
            });
            pending.push((len, rx));
        }
        debug!(chunks = pending.len(), chunk_size, "crypto batch queued");

        let mut out = Vec::new();
        for (len, rx) in pending {
            match rx.await {
                Ok(Ok(results)) => {
                    out.extend(results.into_iter().map(|r| r.map_err(DriveError::Other)))
                }
                _ => out.extend((0..len).map(|_| {
                    Err(DriveError::Other(anyhow::anyhow!("crypto batch chunk failed")))
                })),
            }
        }
        out
    }
}

impl std::fmt::Debug for CryptoPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoPool")
            .field("threads", &self.threads)
            .field("closed", &self.is_shut_down())
            .finish()
    }
}
