// ABOUTME: Application-wide error types for pullwise.
// ABOUTME: Uses thiserror to wrap module errors for the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::AuthError;
use crate::fetch::FetchError;
use crate::ledger::LedgerError;
use crate::runtime::RuntimeError;
use crate::types::ParseImageRefError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ParseImageRefError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
