// ABOUTME: Advisory lock serializing read-modify-write cycles on the ledger.
// ABOUTME: Uses exclusive lock file creation with holder info; stale locks are broken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::LedgerError;

/// Locks older than this are assumed abandoned by a crashed process.
const STALE_AFTER_SECS: i64 = 30;

/// Delay between acquisition attempts while another process holds the lock.
const RETRY_DELAY: Duration = Duration::from_millis(25);

/// Information about who holds a ledger lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create new lock info for the current process.
    pub fn new() -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_seconds() >= STALE_AFTER_SECS
    }

    /// Lock file guarding the ledger at `ledger_path`.
    pub fn lock_path(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        ledger_path.with_file_name(name)
    }
}

impl Default for LockInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// A held ledger lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    /// Acquire the lock for the ledger at `ledger_path`, waiting up to `timeout`.
    ///
    /// Creation with `create_new` is atomic, so two processes can never both
    /// succeed. Stale or unreadable locks are broken with a warning.
    pub async fn acquire(ledger_path: &Path, timeout: Duration) -> Result<Self, LedgerError> {
        let path = LockInfo::lock_path(ledger_path);
        let info = LockInfo::new();
        let content = serde_json::to_vec(&info).map_err(LedgerError::Serialize)?;
        let deadline = Instant::now().checked_add(timeout);

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let lock = Self { path };
                    file.write_all(&content)
                        .await
                        .map_err(|e| LedgerError::io(&lock.path, e))?;
                    file.flush()
                        .await
                        .map_err(|e| LedgerError::io(&lock.path, e))?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(LedgerError::io(&path, e)),
            }

            let existing = Self::read_existing(&path).await;
            match existing {
                Some(ref holder) if !holder.is_stale() => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(LedgerError::LockTimeout {
                            holder: holder.holder.clone(),
                            pid: holder.pid,
                            waited: timeout,
                        });
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Some(holder) => {
                    tracing::warn!(
                        "Breaking stale ledger lock held by {} (pid {}) since {}",
                        holder.holder,
                        holder.pid,
                        holder.started_at
                    );
                    Self::remove(&path).await?;
                }
                None => {
                    // The holder may be between creating and writing the file
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        tracing::warn!("Ledger lock info unreadable, breaking lock");
                        Self::remove(&path).await?;
                    } else {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn read_existing(path: &Path) -> Option<LockInfo> {
        let content = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&content).ok()
    }

    async fn remove(path: &Path) -> Result<(), LedgerError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LedgerError::io(path, e)),
        }
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove ledger lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new();
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn lock_path_sits_next_to_ledger() {
        assert_eq!(
            LockInfo::lock_path(Path::new("/home/u/.pack/image.json")),
            PathBuf::from("/home/u/.pack/image.json.lock")
        );
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        assert!(!LockInfo::new().is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new();
        info.started_at = Utc::now() - chrono::Duration::minutes(2);
        assert!(info.is_stale());
    }
}
