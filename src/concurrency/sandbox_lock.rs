//! Cross-process sandbox lock using advisory file locking (fs2 flock).
//!
//! The container name is machine-global, so two `nlfs` processes would tear
//! down each other's container on startup. Every entry point that opens an
//! executor holds this lock for the executor's lifetime.

use anyhow::Result;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone)]
pub struct SandboxLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
#[derive(Debug)]
pub struct SandboxLockGuard {
    file: File,
}

impl Drop for SandboxLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl SandboxLock {
    /// Lock file in the runtime directory (or state directory fallback).
    pub fn new(paths: &Paths) -> Result<Self> {
        Self::at(paths.sandbox_lock())
    }

    pub fn at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquire. Waits until the lock is available.
    pub fn acquire(&self) -> Result<SandboxLockGuard> {
        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        Ok(SandboxLockGuard { file })
    }

    /// Non-blocking acquire. `None` if another process holds it.
    pub fn try_acquire(&self) -> Result<Option<SandboxLockGuard>> {
        let file = File::create(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(SandboxLockGuard { file })),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            #[cfg(unix)]
            Err(ref e) if e.raw_os_error() == Some(35) || e.raw_os_error() == Some(11) => {
                // EAGAIN(11) / EWOULDBLOCK(35 on macOS)
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Try first, then wait on a blocking thread, logging while waiting.
    pub async fn acquire_async(&self) -> Result<SandboxLockGuard> {
        if let Some(guard) = self.try_acquire()? {
            return Ok(guard);
        }

        tracing::info!(
            "Another nlfs session holds {}; waiting for it to finish",
            self.path.display()
        );
        let lock = self.clone();
        tokio::task::spawn_blocking(move || lock.acquire()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = SandboxLock::at(tmp.path().join("sandbox.lock")).unwrap();

        let guard = lock.acquire().unwrap();
        drop(guard);

        let _again = lock.acquire().unwrap();
    }

    #[test]
    fn creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = SandboxLock::at(tmp.path().join("run/nlfs/sandbox.lock")).unwrap();
        let _guard = lock.acquire().unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("sandbox.lock");

        let file = File::create(&lock_path).unwrap();
        file.lock_exclusive().unwrap();

        let lock = SandboxLock::at(&lock_path).unwrap();
        assert!(lock.try_acquire().unwrap().is_none());

        file.unlock().unwrap();
        drop(file);

        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn async_acquire_waits_for_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = SandboxLock::at(tmp.path().join("sandbox.lock")).unwrap();

        let held = lock.acquire().unwrap();
        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire_async().await.map(|_| ()) })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);

        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn concurrent_threads_serialize() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sandbox.lock");
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let p = path.clone();
                let c = counter.clone();
                let b = barrier.clone();
                std::thread::spawn(move || {
                    let lock = SandboxLock::at(p).unwrap();
                    b.wait();
                    let _guard = lock.acquire().unwrap();
                    c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
