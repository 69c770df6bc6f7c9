// ABOUTME: Credential lookup in the Docker CLI config file.
// ABOUTME: Reads `auths` from $DOCKER_CONFIG/config.json or ~/.docker/config.json.

use super::{AuthError, CredentialResolver, RegistryAuth};
use crate::types::{DEFAULT_REGISTRY, ImageRef, normalize_registry};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Key the Docker CLI stores Docker Hub credentials under.
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Credentials from the Docker CLI config file.
///
/// The file is read on every lookup so logins made while the process runs
/// are picked up. A missing file means anonymous access.
#[derive(Debug, Clone)]
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate the config the way the Docker CLI does: `$DOCKER_CONFIG`
    /// first, then `~/.docker`.
    pub fn from_env() -> Result<Self, AuthError> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG").filter(|d| !d.is_empty()) {
            return Ok(Self::new(PathBuf::from(dir).join(CONFIG_FILE)));
        }

        directories::BaseDirs::new()
            .map(|dirs| Self::new(dirs.home_dir().join(".docker").join(CONFIG_FILE)))
            .ok_or(AuthError::HomeNotFound)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<DockerConfigFile>, AuthError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AuthError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| AuthError::InvalidConfig {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl CredentialResolver for DockerConfigKeychain {
    async fn resolve(&self, reference: &ImageRef) -> Result<Option<RegistryAuth>, AuthError> {
        let Some(config) = self.load().await? else {
            return Ok(None);
        };

        let registry = reference.registry_or_default();
        let found = config
            .auths
            .iter()
            .find(|(server, _)| auth_key_host(server) == registry);

        let Some((server, entry)) = found else {
            if let Some(ref store) = config.creds_store {
                tracing::debug!(
                    "No inline credentials for {}; credential store {} is not consulted",
                    registry,
                    store
                );
            }
            return Ok(None);
        };

        let auth = entry_credentials(server, entry)?;
        if auth.is_some() {
            tracing::debug!("Using credentials for {} from {}", registry, self.path.display());
        }
        Ok(auth)
    }
}

/// Registry host an `auths` key refers to: scheme and path stripped, Docker
/// Hub aliases folded.
fn auth_key_host(key: &str) -> &str {
    let host = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = host.split('/').next().unwrap_or(host);
    if host.is_empty() {
        DEFAULT_REGISTRY
    } else {
        normalize_registry(host)
    }
}

fn entry_credentials(server: &str, entry: &AuthEntry) -> Result<Option<RegistryAuth>, AuthError> {
    if let Some(ref encoded) = entry.auth
        && !encoded.is_empty()
    {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::InvalidAuth {
                server: server.to_string(),
                reason: e.to_string(),
            })?;
        let decoded = String::from_utf8(decoded).map_err(|e| AuthError::InvalidAuth {
            server: server.to_string(),
            reason: e.to_string(),
        })?;
        let (username, password) =
            decoded
                .split_once(':')
                .ok_or_else(|| AuthError::InvalidAuth {
                    server: server.to_string(),
                    reason: "expected username:password".to_string(),
                })?;

        return Ok(Some(RegistryAuth {
            server: server.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }));
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(RegistryAuth {
            server: server.to_string(),
            username: username.clone(),
            password: password.clone(),
        })),
        _ => Ok(None),
    }
}
