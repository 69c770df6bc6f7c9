// ABOUTME: Writes resolved images into an on-disk OCI image layout.
// ABOUTME: Maintains oci-layout, digest-verified blobs/sha256, and index.json.

use super::manifest::{BlobDescriptor, OCI_IMAGE_INDEX_MEDIA_TYPE, sha256_digest};
use super::{RegistryError, RegistryImages, RemoteImage};
use crate::credentials::RegistryAuth;
use crate::types::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Annotation naming the reference an index entry was saved under.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("OCI layout I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LayoutError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LayoutError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<LayoutEntry>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl Default for LayoutIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
            manifests: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutEntry {
    media_type: String,
    digest: String,
    size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl LayoutEntry {
    fn ref_name(&self) -> Option<&str> {
        self.annotations.get(REF_NAME_ANNOTATION).map(String::as_str)
    }
}

/// An OCI image layout directory.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `blobs/<algorithm>/<hex>` for `digest`.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf, LayoutError> {
        match digest.split_once(':') {
            Some(("sha256", hex)) if !hex.is_empty() => {
                Ok(self.root.join("blobs").join("sha256").join(hex))
            }
            _ => Err(LayoutError::UnsupportedDigest(digest.to_string())),
        }
    }

    /// Save `image` under `reference`.
    ///
    /// Sparse saves write only the manifest and config; layers are fetched
    /// from `registry` otherwise. An existing index entry with the same
    /// reference name is replaced.
    pub async fn save<R>(
        &self,
        registry: &R,
        reference: &ImageRef,
        image: &RemoteImage,
        sparse: bool,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), LayoutError>
    where
        R: RegistryImages + ?Sized,
    {
        self.init().await?;

        self.write_blob(&image.config.digest, &image.config_data)
            .await?;

        if !sparse {
            for layer in &image.layers {
                if self.has_blob(&layer.digest).await? {
                    tracing::debug!("Layer {} already in layout", layer.digest);
                    continue;
                }
                let data = registry.fetch_blob(reference, layer, auth).await?;
                self.write_blob(&layer.digest, &data).await?;
            }
        }

        self.write_blob(&image.digest, &image.manifest).await?;
        self.add_manifest(&image.manifest_descriptor(), &reference.canonical())
            .await
    }

    /// Create the layout skeleton if missing.
    pub async fn init(&self) -> Result<(), LayoutError> {
        let blobs = self.root.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs)
            .await
            .map_err(|e| LayoutError::io(&blobs, e))?;

        let marker_path = self.root.join(LAYOUT_FILE);
        if !self.exists(&marker_path).await? {
            let marker = LayoutMarker {
                image_layout_version: LAYOUT_VERSION.to_string(),
            };
            let json = serde_json::to_vec(&marker).map_err(|source| LayoutError::Json {
                path: marker_path.clone(),
                source,
            })?;
            write_atomic(&marker_path, &json).await?;
        }
        Ok(())
    }

    /// Store `data` as the blob `digest` after checking it hashes to it.
    pub async fn write_blob(&self, digest: &str, data: &[u8]) -> Result<(), LayoutError> {
        let path = self.blob_path(digest)?;

        let actual = sha256_digest(data);
        if actual != digest {
            return Err(LayoutError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        if self.exists(&path).await? {
            return Ok(());
        }
        write_atomic(&path, data).await
    }

    pub async fn has_blob(&self, digest: &str) -> Result<bool, LayoutError> {
        let path = self.blob_path(digest)?;
        self.exists(&path).await
    }

    /// Reference names recorded in `index.json`.
    pub async fn ref_names(&self) -> Result<Vec<String>, LayoutError> {
        let index = self.read_index().await?;
        Ok(index
            .manifests
            .iter()
            .filter_map(|entry| entry.ref_name().map(str::to_string))
            .collect())
    }

    async fn add_manifest(
        &self,
        descriptor: &BlobDescriptor,
        ref_name: &str,
    ) -> Result<(), LayoutError> {
        let mut index = self.read_index().await?;

        index
            .manifests
            .retain(|entry| entry.ref_name() != Some(ref_name));
        index.manifests.push(LayoutEntry {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size,
            annotations: BTreeMap::from([(
                REF_NAME_ANNOTATION.to_string(),
                ref_name.to_string(),
            )]),
            extra: BTreeMap::new(),
        });

        let path = self.root.join(INDEX_FILE);
        let json = serde_json::to_vec_pretty(&index).map_err(|source| LayoutError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json).await?;

        tracing::debug!("Saved {} as {} in {}", descriptor.digest, ref_name, self.root.display());
        Ok(())
    }

    async fn read_index(&self) -> Result<LayoutIndex, LayoutError> {
        let path = self.root.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(content) => {
                serde_json::from_slice(&content).map_err(|source| LayoutError::Json { path, source })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LayoutIndex::default()),
            Err(e) => Err(LayoutError::io(path, e)),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool, LayoutError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| LayoutError::io(path, e))
    }
}

/// Write to a sibling temp file, then rename into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), LayoutError> {
    let mut temp = path.as_os_str().to_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, data)
        .await
        .map_err(|e| LayoutError::io(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| LayoutError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_path_requires_sha256() {
        let layout = OciLayout::new("/tmp/layout");
        assert_eq!(
            layout.blob_path("sha256:abc").unwrap(),
            PathBuf::from("/tmp/layout/blobs/sha256/abc")
        );
        assert!(matches!(
            layout.blob_path("sha512:abc"),
            Err(LayoutError::UnsupportedDigest(_))
        ));
    }

    #[tokio::test]
    async fn write_blob_rejects_wrong_content() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path());
        layout.init().await.unwrap();

        let digest = sha256_digest(b"config");
        let err = layout.write_blob(&digest, b"tampered").await.unwrap_err();
        assert!(matches!(err, LayoutError::DigestMismatch { .. }));
        assert!(!layout.has_blob(&digest).await.unwrap());
    }
}
