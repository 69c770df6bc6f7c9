// ABOUTME: Registry credential resolution for image pulls.
// ABOUTME: Anonymous access or entries from the Docker CLI config file.

mod docker_config;

pub use docker_config::{DOCKER_HUB_AUTH_KEY, DockerConfigKeychain};

use crate::types::ImageRef;
use async_trait::async_trait;
use std::path::PathBuf;

/// Registry authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    /// Registry server as written in the credential source.
    pub server: String,
    /// Username.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolves credentials for the registry an image lives in.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Credentials for `reference`, or `None` for anonymous access.
    async fn resolve(&self, reference: &ImageRef) -> Result<Option<RegistryAuth>, AuthError>;
}

/// Always pulls anonymously.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialResolver for Anonymous {
    async fn resolve(&self, _reference: &ImageRef) -> Result<Option<RegistryAuth>, AuthError> {
        Ok(None)
    }
}

/// Errors from credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("could not determine the home directory for the Docker config")]
    HomeNotFound,

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid Docker config {}: {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid credentials for {server}: {reason}")]
    InvalidAuth { server: String, reason: String },
}
