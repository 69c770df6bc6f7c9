// ABOUTME: Runtime detection logic for the local system.
// ABOUTME: Checks for Podman sockets first, then Docker.

use super::types::{RuntimeConfig, RuntimeInfo, RuntimeType};
use std::path::Path;

/// Error during runtime detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no container runtime found (checked Podman and Docker sockets)")]
    NoRuntimeFound,

    #[error("configured {runtime} socket does not exist: {socket}")]
    SocketMissing {
        runtime: RuntimeType,
        socket: String,
    },
}

/// Detect container runtime on the local system.
///
/// Detection order:
/// 1. Rootless Podman socket (`/run/user/$UID/podman/podman.sock`)
/// 2. Rootful Podman socket (`/run/podman/podman.sock`)
/// 3. Docker socket (`/var/run/docker.sock`)
pub fn detect_local() -> Result<RuntimeInfo, DetectionError> {
    // 1. Rootless Podman
    if let Some(uid) = get_uid() {
        let rootless_socket = rootless_podman_socket(&uid);
        if Path::new(&rootless_socket).exists() {
            return Ok(RuntimeInfo {
                runtime_type: RuntimeType::Podman,
                socket_path: rootless_socket,
            });
        }
    }

    // 2. Rootful Podman
    if Path::new(ROOTFUL_PODMAN).exists() {
        return Ok(RuntimeInfo {
            runtime_type: RuntimeType::Podman,
            socket_path: ROOTFUL_PODMAN.to_string(),
        });
    }

    // 3. Docker
    if Path::new(DOCKER_SOCKET).exists() {
        return Ok(RuntimeInfo {
            runtime_type: RuntimeType::Docker,
            socket_path: DOCKER_SOCKET.to_string(),
        });
    }

    Err(DetectionError::NoRuntimeFound)
}

/// Detect the runtime, honoring an explicit override from configuration.
///
/// A configured runtime without a socket uses that runtime's default socket
/// (rootless first for Podman). A configured socket alone keeps
/// auto-detection of the type from the socket path.
pub fn detect_runtime(config: &RuntimeConfig) -> Result<RuntimeInfo, DetectionError> {
    match (config.runtime, config.socket.as_deref()) {
        (Some(runtime_type), Some(socket)) => explicit(runtime_type, socket),
        (Some(runtime_type), None) => {
            let socket = default_socket_path(runtime_type);
            explicit(runtime_type, &socket)
        }
        (None, Some(socket)) => explicit(RuntimeType::from_socket_path(socket), socket),
        (None, None) => detect_local(),
    }
}

fn explicit(runtime_type: RuntimeType, socket: &str) -> Result<RuntimeInfo, DetectionError> {
    if !Path::new(socket).exists() {
        return Err(DetectionError::SocketMissing {
            runtime: runtime_type,
            socket: socket.to_string(),
        });
    }
    Ok(RuntimeInfo {
        runtime_type,
        socket_path: socket.to_string(),
    })
}

fn get_uid() -> Option<String> {
    std::env::var("UID").ok().or_else(|| {
        // Fall back to reading /proc/self/status
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("Uid:"))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(|s| s.to_string())
            })
    })
}

fn rootless_podman_socket(uid: &str) -> String {
    format!("/run/user/{}/podman/podman.sock", uid)
}

const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

fn default_socket_path(runtime: RuntimeType) -> String {
    match runtime {
        RuntimeType::Docker => DOCKER_SOCKET.to_string(),
        RuntimeType::Podman => get_uid()
            .map(|uid| rootless_podman_socket(&uid))
            .filter(|socket| Path::new(socket).exists())
            .unwrap_or_else(|| ROOTFUL_PODMAN.to_string()),
    }
}
