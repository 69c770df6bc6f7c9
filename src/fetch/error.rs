// ABOUTME: Fetch error types with SNAFU pattern.
// ABOUTME: Aggregates reference, daemon, registry, layout, and progress failures.

use snafu::Snafu;
use std::fmt;
use std::path::PathBuf;

use crate::credentials::AuthError;
use crate::registry::{LayoutError, RegistryError};
use crate::runtime::DaemonError;
use crate::types::ParseImageRefError;

/// Image store a lookup was made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStore {
    Daemon,
    Registry,
}

impl fmt::Display for ImageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageStore::Daemon => write!(f, "daemon"),
            ImageStore::Registry => write!(f, "registry"),
        }
    }
}

/// Errors from [`Fetcher::fetch`](super::Fetcher::fetch).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("invalid image reference {reference:?}: {source}"))]
    InvalidReference {
        reference: String,
        source: ParseImageRefError,
    },

    #[snafu(display("image {reference} not found in {store}"))]
    NotFound { reference: String, store: ImageStore },

    #[snafu(display("failed to resolve credentials for {reference}: {source}"))]
    Auth { reference: String, source: AuthError },

    #[snafu(display("daemon lookup of {reference} failed: {source}"))]
    Daemon {
        reference: String,
        source: DaemonError,
    },

    #[snafu(display("failed to pull {reference}: {source}"))]
    Pull {
        reference: String,
        source: DaemonError,
    },

    #[snafu(display("registry lookup of {reference} failed: {source}"))]
    Registry {
        reference: String,
        source: RegistryError,
    },

    #[snafu(display("failed to save {reference} to {}: {source}", path.display()))]
    Layout {
        reference: String,
        path: PathBuf,
        source: LayoutError,
    },

    #[snafu(display("failed to write pull progress: {source}"))]
    Progress { source: std::io::Error },

    #[snafu(display("fetch of {reference} was cancelled"))]
    Cancelled { reference: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    InvalidReference,
    NotFound,
    Auth,
    Daemon,
    Pull,
    Registry,
    Layout,
    Progress,
    Cancelled,
}

impl FetchError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::InvalidReference { .. } => FetchErrorKind::InvalidReference,
            FetchError::NotFound { .. } => FetchErrorKind::NotFound,
            FetchError::Auth { .. } => FetchErrorKind::Auth,
            FetchError::Daemon { .. } => FetchErrorKind::Daemon,
            FetchError::Pull { .. } => FetchErrorKind::Pull,
            FetchError::Registry { .. } => FetchErrorKind::Registry,
            FetchError::Layout { .. } => FetchErrorKind::Layout,
            FetchError::Progress { .. } => FetchErrorKind::Progress,
            FetchError::Cancelled { .. } => FetchErrorKind::Cancelled,
        }
    }

    /// Whether the image is absent from the store that was asked.
    pub fn is_not_found(&self) -> bool {
        self.kind() == FetchErrorKind::NotFound
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == FetchErrorKind::Cancelled
    }
}
