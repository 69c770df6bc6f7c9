// ABOUTME: Error types for pull ledger operations.
// ABOUTME: Covers file access, corrupt JSON, malformed stored values, and lock contention.

use crate::types::ParseIntervalError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("could not determine the home directory for the pull ledger")]
    HomeNotFound,

    #[error("pull ledger I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pull ledger {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize pull ledger: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("pull ledger holds an invalid {field}: {source}")]
    InvalidInterval {
        field: &'static str,
        #[source]
        source: ParseIntervalError,
    },

    #[error("pull ledger holds an invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("timed out after {waited:?} waiting for ledger lock held by {holder} (pid {pid})")]
    LockTimeout {
        holder: String,
        pid: u32,
        waited: Duration,
    },
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }
}
