//! Shared resources of an installation: the io concurrency limit and the
//! per-prefix advisory lock.

use std::{path::Path, sync::Arc};

use tokio::sync::Semaphore;

/// The default number of concurrent io-bound operations.
const DEFAULT_IO_CONCURRENCY: usize = 10;

/// Shared state of one installation run: bounds the number of concurrent
/// io-bound operations and guards the prefix against concurrent
/// transactions.
#[derive(Clone)]
pub struct InstallDriver {
    io_semaphore: Arc<Semaphore>,
}

impl Default for InstallDriver {
    fn default() -> Self {
        Self::new(DEFAULT_IO_CONCURRENCY)
    }
}

impl InstallDriver {
    /// Creates a driver that allows up to `io_concurrency` concurrent
    /// io-bound operations.
    pub fn new(io_concurrency: usize) -> Self {
        Self {
            io_semaphore: Arc::new(Semaphore::new(io_concurrency.max(1))),
        }
    }

    /// Acquires an io permit, waiting when the pool is exhausted.
    pub async fn acquire_io_permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.io_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("the io semaphore is never closed")
    }

    /// Takes the advisory lock of a prefix, creating the lock file when
    /// needed. Only one transaction may be in flight per prefix; a second
    /// caller blocks here until the first one finishes.
    pub async fn lock_prefix(&self, prefix: &Path) -> Result<PrefixGuard, std::io::Error> {
        let conda_meta = prefix.join("conda-meta");
        tokio::fs::create_dir_all(&conda_meta).await?;

        let lock_path = conda_meta.join(".lock");
        let lock = tokio::task::spawn_blocking(move || -> Result<fslock::LockFile, std::io::Error> {
            let mut lock = fslock::LockFile::open(&lock_path)?;
            lock.lock()?;
            Ok(lock)
        })
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Interrupted, "lock task cancelled"))??;

        Ok(PrefixGuard { _lock: lock })
    }
}

/// Holds the advisory lock of a prefix; dropping it releases the lock.
pub struct PrefixGuard {
    _lock: fslock::LockFile,
}

#[cfg(test)]
mod test {
    use super::InstallDriver;

    #[tokio::test]
    async fn permits_are_bounded() {
        let driver = InstallDriver::new(2);
        let _a = driver.acquire_io_permit().await;
        let _b = driver.acquire_io_permit().await;

        // A third permit is only available once one of the first two drops.
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            driver.acquire_io_permit(),
        )
        .await;
        assert!(third.is_err());

        drop(_a);
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            driver.acquire_io_permit(),
        )
        .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn prefix_lock_creates_conda_meta() {
        let dir = tempfile::tempdir().unwrap();
        let driver = InstallDriver::default();
        let _guard = driver.lock_prefix(dir.path()).await.unwrap();
        assert!(dir.path().join("conda-meta/.lock").exists());
    }
}
