// ABOUTME: Daemon flavors, detected connection details, and the config override.
// ABOUTME: RuntimeConfig is the `runtime:` section of pullwise.yml.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which daemon serves the image store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Docker,
    Podman,
}

impl RuntimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Guess the daemon from a socket path alone.
    pub fn from_socket_path(socket: &str) -> Self {
        if socket.contains("podman") {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        }
    }

    /// Podman's native API accepts per-pull `tlsVerify`.
    pub fn has_libpod_api(self) -> bool {
        self == RuntimeType::Podman
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A daemon found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub runtime_type: RuntimeType,
    /// Unix socket the daemon listens on.
    pub socket_path: String,
}

/// Overrides for daemon selection. Everything is auto-detected when empty.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime: Option<RuntimeType>,
    #[serde(default)]
    pub socket: Option<String>,
    /// Verify registry TLS on daemon pulls. Only Podman can turn this off
    /// per pull; Docker follows its own insecure-registry settings.
    #[serde(default = "verify_by_default")]
    pub tls_verify: bool,
}

fn verify_by_default() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            socket: None,
            tls_verify: verify_by_default(),
        }
    }
}
