//! Bounded worker pool for file operations.
//!
//! Every submitted operation runs on its own tokio task once a permit is
//! available. The operation gets the shared [`FileSystem`] and opens its own
//! transaction through it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Failure;
use crate::file::FileSystem;
use crate::{Result, SiloError};

/// Runs file operations with bounded concurrency.
#[derive(Clone)]
pub struct WorkerPool {
    fs: Arc<FileSystem>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// Create a new pool. At least one worker is always allowed.
    pub fn new(fs: Arc<FileSystem>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            fs,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Get the shared file system.
    pub fn file_system(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// Get the maximum number of concurrent operations.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Get the number of free worker slots.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the number of operations currently running.
    pub fn active_workers(&self) -> usize {
        self.max_workers - self.semaphore.available_permits()
    }

    /// Stop accepting work. Operations already holding a slot finish;
    /// waiting and later submissions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Submit an operation.
    ///
    /// Errors are logged and handed back as a [`Failure`].
    pub fn submit<T, F, Fut>(
        &self,
        label: &'static str,
        task: F,
    ) -> JoinHandle<std::result::Result<T, Failure>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<FileSystem>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let fs = self.fs.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|_| {
                Failure::from(SiloError::Processing("worker pool is closed".to_string()))
            })?;

            debug!(operation = label, "running operation");
            match task(fs).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    let failure = Failure::from(e);
                    warn!(
                        operation = label,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "operation failed"
                    );
                    Err(failure)
                }
            }
        })
    }
}
