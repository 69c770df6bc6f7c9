// ABOUTME: The image handle returned by a fetch.
// ABOUTME: Records the resolved reference and which store the image came from.

use crate::runtime::LocalImage;
use crate::types::ImageRef;
use std::path::PathBuf;

/// Where a fetched image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// In the daemon's image store.
    Daemon(LocalImage),
    /// In the remote registry; nothing was downloaded.
    Registry { digest: String, media_type: String },
    /// Saved into an OCI layout directory.
    Layout {
        path: PathBuf,
        digest: String,
        sparse: bool,
    },
}

/// A fetched image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Reference the image was fetched under, after mirror rewriting.
    pub reference: ImageRef,
    pub origin: ImageOrigin,
}

impl ImageHandle {
    pub fn new(reference: ImageRef, origin: ImageOrigin) -> Self {
        Self { reference, origin }
    }

    /// Daemon image ID or manifest digest.
    pub fn id(&self) -> &str {
        match &self.origin {
            ImageOrigin::Daemon(image) => &image.id,
            ImageOrigin::Registry { digest, .. } | ImageOrigin::Layout { digest, .. } => digest,
        }
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self.origin, ImageOrigin::Daemon(_))
    }

    /// Short name of the store, for display.
    pub fn store(&self) -> &'static str {
        match self.origin {
            ImageOrigin::Daemon(_) => "daemon",
            ImageOrigin::Registry { .. } => "registry",
            ImageOrigin::Layout { .. } => "layout",
        }
    }
}
