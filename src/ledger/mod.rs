// ABOUTME: Persistent pull ledger recording when each image was last pulled.
// ABOUTME: JSON file under ~/.pack with interval checks and pull-triggered pruning.

mod error;
mod key;
mod lock;
mod record;

pub use error::LedgerError;
pub use key::LedgerKey;
pub use lock::{LedgerLock, LockInfo};
pub use record::{
    DEFAULT_PRUNING_INTERVAL, ImagePulls, IntervalSettings, LedgerRecord, format_timestamp,
    parse_timestamp,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::IntervalSpec;

/// Ledger directory, relative to the home directory.
pub const LEDGER_DIR: &str = ".pack";

/// Ledger file name inside [`LEDGER_DIR`].
pub const LEDGER_FILE: &str = "image.json";

/// How long to wait for another process to release the ledger.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a prune request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// The last prune is recent enough; nothing was touched.
    Skipped { next_due: DateTime<Utc> },
    /// Pruning ran and removed this many entries.
    Pruned { removed: usize },
}

/// Handle to the pull ledger file.
///
/// Cheap to clone; every operation goes to disk. Read-modify-write
/// operations hold a [`LedgerLock`] and replace the file atomically.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    lock_timeout: Duration,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// `<home>/.pack/image.json`.
    pub fn default_path() -> Result<PathBuf, LedgerError> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(LEDGER_DIR).join(LEDGER_FILE))
            .ok_or(LedgerError::HomeNotFound)
    }

    pub fn at_default_location() -> Result<Self, LedgerError> {
        Self::default_path().map(Self::new)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger, creating the directory and a minimal document first
    /// if they do not exist.
    pub async fn read(&self) -> Result<LedgerRecord, LedgerError> {
        if !self.exists().await? {
            self.ensure_dir().await?;
            let _lock = self.lock().await?;
            self.bootstrap().await?;
        }
        self.load().await
    }

    /// Replace the ledger with `record`.
    pub async fn write(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        self.ensure_dir().await?;
        let _lock = self.lock().await?;
        self.write_unlocked(record).await
    }

    /// Whether `key` is due for a pull: never pulled, or last pulled at
    /// least one pulling interval ago.
    pub async fn check_interval(&self, key: &str) -> Result<bool, LedgerError> {
        self.check_interval_at(key, Utc::now()).await
    }

    pub async fn check_interval_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let record = self.read().await?;

        let Some(last_pull) = record.last_pull(key)? else {
            return Ok(true);
        };

        let interval = record.pulling_interval()?;
        Ok(now - last_pull >= interval.duration())
    }

    /// Record a successful pull of `key` at `at`.
    pub async fn record_pull(&self, key: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.update(|record| {
            record
                .image
                .pulls
                .insert(key.to_string(), format_timestamp(at));
            Ok(((), true))
        })
        .await
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub async fn evict(&self, key: &str) -> Result<bool, LedgerError> {
        self.update(|record| {
            let removed = record.image.pulls.remove(key).is_some();
            Ok((removed, removed))
        })
        .await
    }

    /// Store the interval of the active pull policy, if it changed.
    pub async fn set_pulling_interval(&self, spec: &IntervalSpec) -> Result<(), LedgerError> {
        self.update(|record| {
            if record.interval.pulling_interval == spec.as_str() {
                return Ok(((), false));
            }
            record.interval.pulling_interval = spec.as_str().to_string();
            Ok(((), true))
        })
        .await
    }

    /// Drop entries older than the pruning interval, at most once per
    /// pruning interval.
    pub async fn prune(&self) -> Result<PruneOutcome, LedgerError> {
        self.prune_at(Utc::now()).await
    }

    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<PruneOutcome, LedgerError> {
        self.update(|record| {
            let pruning = record.pruning_interval()?.duration();

            if let Some(last_prune) = record.last_prune()?
                && now - last_prune < pruning
            {
                let next_due = last_prune
                    .checked_add_signed(pruning)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                return Ok((PruneOutcome::Skipped { next_due }, false));
            }

            // An interval reaching past the representable range expires nothing.
            let threshold = now
                .checked_sub_signed(pruning)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let mut stale = Vec::new();
            for (key, value) in record.images() {
                if parse_timestamp(value)? < threshold {
                    stale.push(key.to_string());
                }
            }

            for key in &stale {
                record.image.pulls.remove(key);
            }
            record.interval.last_prune = format_timestamp(now);

            tracing::debug!("Pruned {} ledger entries older than {}", stale.len(), threshold);
            Ok((
                PruneOutcome::Pruned {
                    removed: stale.len(),
                },
                true,
            ))
        })
        .await
    }

    /// Locked read-modify-write. `apply` returns its result and whether the
    /// record changed; unchanged records are not written back.
    async fn update<T, F>(&self, apply: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerRecord) -> Result<(T, bool), LedgerError>,
    {
        self.ensure_dir().await?;
        let _lock = self.lock().await?;
        self.bootstrap().await?;

        let mut record = self.load().await?;
        let (result, changed) = apply(&mut record)?;
        if changed {
            self.write_unlocked(&record).await?;
        }
        Ok(result)
    }

    async fn lock(&self) -> Result<LedgerLock, LedgerError> {
        LedgerLock::acquire(&self.path, self.lock_timeout).await
    }

    async fn exists(&self) -> Result<bool, LedgerError> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| LedgerError::io(&self.path, e))
    }

    async fn ensure_dir(&self) -> Result<(), LedgerError> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() || dir.exists() {
            return Ok(());
        }

        tracing::debug!("Creating ledger directory {}", dir.display());
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| LedgerError::io(dir, e))
    }

    /// Write a minimal document if the file is missing. Caller holds the lock.
    async fn bootstrap(&self) -> Result<(), LedgerError> {
        if self.exists().await? {
            return Ok(());
        }
        tracing::debug!("Creating pull ledger {}", self.path.display());
        self.write_unlocked(&LedgerRecord::default()).await
    }

    async fn load(&self) -> Result<LedgerRecord, LedgerError> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| LedgerError::io(&self.path, e))?;

        serde_json::from_slice(&content).map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write via a sibling temp file and rename, so readers never observe a
    /// half-written ledger.
    async fn write_unlocked(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let json = to_pretty_json(record)?;
        let temp_path = self.temp_path();

        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| LedgerError::io(&temp_path, e))?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| LedgerError::io(&self.path, e))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from(LEDGER_FILE));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Pretty-print with four-space indentation.
fn to_pretty_json(record: &LedgerRecord) -> Result<Vec<u8>, LedgerError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    record
        .serialize(&mut serializer)
        .map_err(LedgerError::Serialize)?;
    Ok(out)
}
