// ABOUTME: Registry client over oci-client.
// ABOUTME: Resolves manifests (narrowing indexes by platform) and downloads blobs.

use super::manifest::{
    BlobDescriptor, MANIFEST_MEDIA_TYPES, Manifest, OCI_IMAGE_MANIFEST_MEDIA_TYPE, Platform,
};
use super::{RegistryError, RegistryImages, RemoteImage};
use crate::credentials::RegistryAuth;
use crate::types::ImageRef;
use async_trait::async_trait;
use oci_client::client::{ClientConfig, ClientProtocol};
use oci_client::errors::{OciDistributionError, OciErrorCode};
use oci_client::manifest::OciDescriptor;
use oci_client::{Client, Reference, RegistryOperation};

/// Remote registry accessed with oci-client.
pub struct OciRegistry {
    client: Client,
}

impl OciRegistry {
    pub fn new() -> Self {
        Self::with_insecure_registries(Vec::<String>::new())
    }

    /// Talk plain HTTP to the listed registries (`host[:port]`).
    pub fn with_insecure_registries<I, S>(registries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let insecure: Vec<String> = registries.into_iter().map(Into::into).collect();
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure)
        };

        let config = ClientConfig {
            protocol,
            ..Default::default()
        };

        Self {
            client: Client::new(config),
        }
    }

    /// Raw manifest and its digest, or `None` if the registry lacks it.
    async fn manifest(
        &self,
        reference: &Reference,
        auth: &oci_client::secrets::RegistryAuth,
        name: &str,
    ) -> Result<Option<(Vec<u8>, String)>, RegistryError> {
        match self
            .client
            .pull_manifest_raw(reference, auth, MANIFEST_MEDIA_TYPES)
            .await
        {
            Ok((raw, digest)) => Ok(Some((raw.to_vec(), digest))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_error(e, name)),
        }
    }

    async fn blob(
        &self,
        reference: &Reference,
        blob: &BlobDescriptor,
        name: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let descriptor = OciDescriptor {
            media_type: blob.media_type.clone(),
            digest: blob.digest.clone(),
            size: i64::try_from(blob.size).unwrap_or(i64::MAX),
            ..Default::default()
        };

        let mut data = Vec::new();
        self.client
            .pull_blob(reference, &descriptor, &mut data)
            .await
            .map_err(|e| map_error(e, name))?;
        Ok(data)
    }
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryImages for OciRegistry {
    async fn resolve(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<RemoteImage>, RegistryError> {
        let name = reference.canonical();
        let oci_ref = to_reference(reference)?;
        let oci_auth = to_oci_auth(auth);
        let wanted = match platform {
            Some(platform) => {
                Platform::parse(platform).ok_or_else(|| RegistryError::InvalidReference {
                    reference: name.clone(),
                    reason: format!("invalid platform {:?}", platform),
                })?
            }
            None => Platform::host(),
        };

        let Some((raw, digest)) = self.manifest(&oci_ref, &oci_auth, &name).await? else {
            return Ok(None);
        };

        let (raw, digest, manifest) = match parse_manifest(&raw, &name)? {
            Manifest::Image(manifest) => (raw, digest, manifest),
            Manifest::Index(index) => {
                let entry =
                    index
                        .find(&wanted)
                        .ok_or_else(|| RegistryError::NoMatchingPlatform {
                            reference: name.clone(),
                            platform: wanted.to_string(),
                        })?;
                tracing::debug!("Selected {} for {} from index {}", entry.digest, wanted, digest);

                let platform_ref = Reference::with_digest(
                    oci_ref.registry().to_string(),
                    oci_ref.repository().to_string(),
                    entry.digest.clone(),
                );
                let Some((raw, digest)) = self.manifest(&platform_ref, &oci_auth, &name).await?
                else {
                    return Ok(None);
                };
                match parse_manifest(&raw, &name)? {
                    Manifest::Image(manifest) => (raw, digest, manifest),
                    Manifest::Index(_) => {
                        return Err(RegistryError::InvalidManifest {
                            reference: name,
                            reason: "index entry points at another index".to_string(),
                        });
                    }
                }
            }
        };

        let config_data = self.blob(&oci_ref, &manifest.config, &name).await?;

        Ok(Some(RemoteImage {
            digest,
            media_type: manifest
                .media_type
                .unwrap_or_else(|| OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            manifest: raw,
            config: manifest.config,
            config_data,
            layers: manifest.layers,
        }))
    }

    async fn fetch_blob(
        &self,
        reference: &ImageRef,
        blob: &BlobDescriptor,
        auth: Option<&RegistryAuth>,
    ) -> Result<Vec<u8>, RegistryError> {
        let name = reference.canonical();
        let oci_ref = to_reference(reference)?;

        self.client
            .auth(&oci_ref, &to_oci_auth(auth), RegistryOperation::Pull)
            .await
            .map_err(|e| map_error(e, &name))?;

        self.blob(&oci_ref, blob, &name).await
    }
}

fn to_reference(reference: &ImageRef) -> Result<Reference, RegistryError> {
    let canonical = reference.canonical();
    canonical
        .parse::<Reference>()
        .map_err(|e| RegistryError::InvalidReference {
            reference: canonical.clone(),
            reason: e.to_string(),
        })
}

fn to_oci_auth(auth: Option<&RegistryAuth>) -> oci_client::secrets::RegistryAuth {
    match auth {
        Some(auth) => {
            oci_client::secrets::RegistryAuth::Basic(auth.username.clone(), auth.password.clone())
        }
        None => oci_client::secrets::RegistryAuth::Anonymous,
    }
}

fn parse_manifest(raw: &[u8], name: &str) -> Result<Manifest, RegistryError> {
    Manifest::parse(raw).map_err(|e| RegistryError::InvalidManifest {
        reference: name.to_string(),
        reason: e.to_string(),
    })
}

fn is_not_found(e: &OciDistributionError) -> bool {
    match e {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown
            )
        }),
        _ => false,
    }
}

fn map_error(e: OciDistributionError, name: &str) -> RegistryError {
    match e {
        OciDistributionError::AuthenticationFailure(message) => {
            RegistryError::Unauthorized(format!("{}: {}", name, message))
        }
        OciDistributionError::UnauthorizedError { .. } => {
            RegistryError::Unauthorized(name.to_string())
        }
        other => RegistryError::Request {
            reference: name.to_string(),
            message: other.to_string(),
        },
    }
}
