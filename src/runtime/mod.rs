// ABOUTME: Container daemon access for Docker and Podman.
// ABOUTME: Auto-detects the local runtime or uses explicit config.

mod bollard;
mod detection;
mod error;
pub mod traits;
mod types;

pub use bollard::BollardDaemon;
pub use detection::{DetectionError, detect_local, detect_runtime};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::{DaemonError, DaemonImages, LocalImage, PLATFORM_MISMATCH, PullProgress, PullStream};
pub use types::{RuntimeConfig, RuntimeInfo, RuntimeType};

/// Detect the runtime per `config` and connect to it.
pub fn connect(config: &RuntimeConfig) -> Result<BollardDaemon, RuntimeError> {
    let info = detect_runtime(config)?;
    tracing::debug!("Using {} at {}", info.runtime_type, info.socket_path);
    BollardDaemon::connect(&info, config)
}
