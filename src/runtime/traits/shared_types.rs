// ABOUTME: Shared types used across daemon capability traits.
// ABOUTME: LocalImage, PullProgress, and the boxed pull progress stream.

use futures::Stream;
use serde::Serialize;
use std::pin::Pin;

use super::image::DaemonError;

/// An image present in the daemon's local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalImage {
    /// Image ID (config digest), e.g. `sha256:...`.
    pub id: String,
    /// Repository digests the daemon knows this image by.
    pub repo_digests: Vec<String>,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,
}

impl LocalImage {
    /// `os/architecture`, the form platforms are written in.
    pub fn platform(&self) -> String {
        format!("{}/{}", self.os, self.architecture)
    }
}

/// One progress message from a daemon pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    /// Layer ID or tag the message is about, if any.
    pub id: Option<String>,
    /// Status text, e.g. `Downloading` or `Pull complete`.
    pub status: String,
    /// Bytes processed so far.
    pub current: Option<u64>,
    /// Total bytes, when known.
    pub total: Option<u64>,
}

impl PullProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn layer(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }
}

/// Progress messages of a running pull. Dropping the stream abandons the pull.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<PullProgress, DaemonError>> + Send>>;
