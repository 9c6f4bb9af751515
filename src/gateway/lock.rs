//! Gateway Lock
//!
//! Exclusive advisory lock serializing every read-modify-write cycle on one
//! gateway config, across engines and processes. The lock lives on a
//! sibling `<config>.lock` file so the config itself can be replaced by
//! rename while it is held.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use tracing::debug;

use crate::error::{Error, Result};

/// Held lock; released when dropped
#[derive(Debug)]
pub struct GatewayLock {
    // flock is tied to the open file description
    _file: File,
    path: PathBuf,
}

impl GatewayLock {
    /// Block until the lock for `config_path` is ours
    pub fn acquire(config_path: &Path) -> Result<Self> {
        let path = lock_path(config_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(std::io::Error::from)?;
        debug!("Acquired gateway lock {:?}", path);
        Ok(Self { _file: file, path })
    }

    /// Acquire without stalling the async runtime
    pub async fn acquire_async(config_path: &Path) -> Result<Self> {
        let config_path = config_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire(&config_path))
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(config_path: &Path) -> PathBuf {
    let mut name = config_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    config_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_file_sits_beside_config() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("wg0.conf");
        let lock = GatewayLock::acquire(&config).unwrap();
        assert_eq!(lock.path(), dir.path().join("wg0.conf.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn test_second_holder_waits_for_release() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("wg0.conf");
        let first = GatewayLock::acquire(&config).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let config = config.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _second = GatewayLock::acquire(&config).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
