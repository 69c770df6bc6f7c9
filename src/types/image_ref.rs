// ABOUTME: Container image reference parsing and normalization.
// ABOUTME: Handles nginx, nginx:tag, registry/image:tag@digest and Docker Hub defaults.

use std::fmt;
use thiserror::Error;

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference names neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// Hostnames that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }
        if let Some(c) = input.chars().find(|&c| !is_reference_char(c)) {
            return Err(ParseImageRefError::InvalidChar(c));
        }
        let malformed = || ParseImageRefError::InvalidFormat(input.to_string());

        let (location, digest) = match input.split_once('@') {
            Some((_, digest)) if !digest.contains(':') => return Err(malformed()),
            Some((location, digest)) => (location, Some(digest.to_string())),
            None => (input, None),
        };

        // The last colon starts a tag unless a path follows it (registry port).
        let (location, tag) = match location.rsplit_once(':') {
            Some((_, "")) => return Err(malformed()),
            Some((path, tag)) if !tag.contains('/') => (path, Some(tag.to_string())),
            _ => (location, None),
        };

        if location.is_empty() || location.starts_with('/') || location.ends_with('/') {
            return Err(malformed());
        }

        let (registry, name) = match location.split_once('/') {
            Some((host, rest)) if looks_like_registry(host) => {
                (Some(host.to_string()), rest.to_string())
            }
            _ => (None, location.to_string()),
        };

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Registry hostname with Docker Hub aliases folded to `docker.io`.
    pub fn registry_or_default(&self) -> &str {
        normalize_registry(self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY))
    }

    /// Repository path as the registry sees it.
    ///
    /// Single-component Docker Hub names live under `library/`.
    pub fn repository(&self) -> String {
        if self.registry_or_default() == DEFAULT_REGISTRY && !self.name.contains('/') {
            format!("library/{}", self.name)
        } else {
            self.name.clone()
        }
    }

    /// The same image served from another registry host (or host/path prefix).
    pub fn with_registry(&self, registry: &str) -> ImageRef {
        let location = format!("{}/{}", registry.trim_end_matches('/'), self.repository());
        let (registry, name) = match location.split_once('/') {
            Some((host, rest)) => (Some(host.to_string()), rest.to_string()),
            None => (None, location),
        };

        ImageRef {
            registry,
            name,
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }

    /// Fully-qualified form: registry and repository made explicit.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}/{}", self.registry_or_default(), self.repository());
        if let Some(ref tag) = self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

fn is_reference_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '-' | '_' | '@')
}

/// A first path component is a registry host if it has a dot or port, or is `localhost`.
fn looks_like_registry(component: &str) -> bool {
    component.contains(['.', ':']) || component == "localhost"
}

/// Fold Docker Hub host aliases into `docker.io`.
pub fn normalize_registry(registry: &str) -> &str {
    if DOCKER_HUB_ALIASES.contains(&registry) {
        DEFAULT_REGISTRY
    } else {
        registry
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
