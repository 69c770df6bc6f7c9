// ABOUTME: Per-call fetch options and the image source they select.
// ABOUTME: Daemon or registry, platform, pull policy, and OCI layout output.

use super::policy::PullPolicy;
use std::path::PathBuf;

/// Save the fetched image into an OCI layout directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutOption {
    pub path: PathBuf,
    /// Write only the manifest and config, without layers.
    pub sparse: bool,
}

/// Options for a single [`Fetcher::fetch`](super::Fetcher::fetch) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Use the daemon's image store. When false the registry is queried
    /// directly and nothing is pulled.
    pub daemon: bool,
    /// Requested platform, `os/arch[/variant]`.
    pub platform: Option<String>,
    pub pull_policy: PullPolicy,
    /// When set, the image is written to this layout and the pull policy
    /// and ledger are bypassed.
    pub layout: Option<LayoutOption>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            daemon: true,
            platform: None,
            pull_policy: PullPolicy::default(),
            layout: None,
        }
    }
}

impl FetchOptions {
    /// Fetch through the daemon under `policy`.
    pub fn daemon(policy: PullPolicy) -> Self {
        Self {
            pull_policy: policy,
            ..Default::default()
        }
    }

    /// Resolve in the registry only.
    pub fn registry() -> Self {
        Self {
            daemon: false,
            ..Default::default()
        }
    }

    /// Save into the OCI layout at `path`.
    pub fn layout(path: impl Into<PathBuf>, sparse: bool) -> Self {
        Self {
            daemon: false,
            layout: Some(LayoutOption {
                path: path.into(),
                sparse,
            }),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// The source this call reads from. Layout output takes precedence
    /// over the daemon flag.
    pub fn source(&self) -> FetchSource {
        match (&self.layout, self.daemon) {
            (Some(layout), _) => FetchSource::Layout(layout.clone()),
            (None, false) => FetchSource::Registry,
            (None, true) => FetchSource::Daemon(self.pull_policy.clone()),
        }
    }
}

/// Where a fetch obtains its image, decided once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    Layout(LayoutOption),
    Registry,
    Daemon(PullPolicy),
}
