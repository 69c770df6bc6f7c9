// ABOUTME: Remote registry access and OCI layout output.
// ABOUTME: Defines the RegistryImages capability and the image types it returns.

mod client;
mod layout;
mod manifest;

pub use client::OciRegistry;
pub use layout::{LayoutError, OciLayout, REF_NAME_ANNOTATION};
pub use manifest::{
    BlobDescriptor, DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, ImageManifest,
    IndexEntry, IndexManifest, MANIFEST_MEDIA_TYPES, Manifest, OCI_IMAGE_INDEX_MEDIA_TYPE,
    OCI_IMAGE_MANIFEST_MEDIA_TYPE, Platform, sha256_digest,
};

use crate::credentials::RegistryAuth;
use crate::types::ImageRef;
use async_trait::async_trait;

/// A single-platform image resolved in a remote registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    /// Digest of the image manifest.
    pub digest: String,
    /// Media type of the image manifest.
    pub media_type: String,
    /// Raw manifest bytes, exactly as served.
    pub manifest: Vec<u8>,
    /// Config blob descriptor.
    pub config: BlobDescriptor,
    /// Config blob content.
    pub config_data: Vec<u8>,
    /// Layer blob descriptors, base layer first.
    pub layers: Vec<BlobDescriptor>,
}

impl RemoteImage {
    /// Descriptor of the manifest itself.
    pub fn manifest_descriptor(&self) -> BlobDescriptor {
        BlobDescriptor {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.manifest.len() as u64,
        }
    }
}

/// Image operations of a remote registry.
#[async_trait]
pub trait RegistryImages: Send + Sync {
    /// Resolve `reference` to a single-platform image. Multi-platform
    /// indexes are narrowed to `platform`, or the host platform when `None`.
    /// `Ok(None)` when the registry does not have the image.
    async fn resolve(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<RemoteImage>, RegistryError>;

    /// Download one blob of `reference`.
    async fn fetch_blob(
        &self,
        reference: &ImageRef,
        blob: &BlobDescriptor,
        auth: Option<&RegistryAuth>,
    ) -> Result<Vec<u8>, RegistryError>;
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid registry reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("authentication failed for {0}")]
    Unauthorized(String),

    #[error("{reference} has no image for platform {platform}")]
    NoMatchingPlatform { reference: String, platform: String },

    #[error("invalid manifest for {reference}: {reason}")]
    InvalidManifest { reference: String, reason: String },

    #[error("registry request for {reference} failed: {message}")]
    Request { reference: String, message: String },
}
