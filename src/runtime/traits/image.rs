// ABOUTME: Image capability of the container daemon.
// ABOUTME: Look up local images and open a pull progress stream.

use super::shared_types::{LocalImage, PullStream};
use crate::credentials::RegistryAuth;
use crate::types::ImageRef;
use async_trait::async_trait;

/// Message fragment daemons use when a pulled image does not match the
/// requested platform.
pub const PLATFORM_MISMATCH: &str = "does not match the specified platform";

/// Image operations of a container daemon.
#[async_trait]
pub trait DaemonImages: Send + Sync {
    /// Look up an image in the local store. `Ok(None)` when absent.
    async fn lookup_image(&self, reference: &ImageRef) -> Result<Option<LocalImage>, DaemonError>;

    /// Start pulling an image. The pull makes progress as the returned stream
    /// is polled and is abandoned when the stream is dropped.
    async fn pull_image_stream(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, DaemonError>;
}

/// Errors from daemon image operations.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("{image}: {message}")]
    PlatformMismatch { image: String, message: String },

    #[error("authentication failed for registry: {0}")]
    AuthenticationFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl DaemonError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DaemonError::NotFound(_))
    }

    pub fn is_platform_mismatch(&self) -> bool {
        matches!(self, DaemonError::PlatformMismatch { .. })
    }

    /// Classify a daemon error message for `image`.
    pub fn from_message(image: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(PLATFORM_MISMATCH) {
            DaemonError::PlatformMismatch {
                image: image.to_string(),
                message,
            }
        } else if is_not_found_message(&message) {
            DaemonError::NotFound(format!("{}: {}", image, message))
        } else if is_auth_message(&message) {
            DaemonError::AuthenticationFailed(format!("{}: {}", image, message))
        } else {
            DaemonError::PullFailed(format!("{}: {}", image, message))
        }
    }
}

fn is_not_found_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("manifest unknown")
}

fn is_auth_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("unauthorized") || lower.contains("authentication required")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_platform_mismatch() {
        let err = DaemonError::from_message(
            "alpine:3",
            "image with reference alpine:3 was found but does not match the specified platform: wanted linux/arm64",
        );
        assert!(err.is_platform_mismatch());
    }

    #[test]
    fn classifies_manifest_unknown_as_not_found() {
        let err = DaemonError::from_message("ghost:1", "manifest unknown: manifest unknown");
        assert!(err.is_not_found());
    }

    #[test]
    fn other_messages_are_pull_failures() {
        let err = DaemonError::from_message("alpine:3", "connection reset by peer");
        assert!(matches!(err, DaemonError::PullFailed(_)));
    }
}
