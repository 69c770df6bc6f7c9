// ABOUTME: Configuration types and parsing for pullwise.yml.
// ABOUTME: Handles YAML parsing, discovery, and defaults when no file exists.

mod deserialize;
mod init;

pub use init::{init_config, template_yaml};

use crate::error::{Error, Result};
use crate::fetch::PullPolicy;
use crate::ledger::{DEFAULT_LOCK_TIMEOUT, Ledger};
use crate::registry::Platform;
use crate::runtime::RuntimeConfig;
use crate::types::RegistryMirrors;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "pullwise.yml";
pub const CONFIG_FILENAME_ALT: &str = "pullwise.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".pullwise/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Source registry (or `*`) to mirror host.
    #[serde(default, deserialize_with = "deserialize::deserialize_mirrors")]
    pub registry_mirrors: RegistryMirrors,

    #[serde(default)]
    pub pull_policy: PullPolicy,

    /// Default platform for pulls, `os/arch[/variant]`.
    #[serde(default)]
    pub platform: Option<String>,

    /// Overrides `~/.pack/image.json`.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,

    #[serde(default = "default_lock_timeout", with = "humantime_serde")]
    pub lock_timeout: Duration,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Registries reached over plain HTTP (`host[:port]`).
    #[serde(default)]
    pub insecure_registries: Vec<String>,
}

fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_mirrors: RegistryMirrors::default(),
            pull_policy: PullPolicy::default(),
            platform: None,
            ledger_path: None,
            lock_timeout: default_lock_timeout(),
            runtime: RuntimeConfig::default(),
            insecure_registries: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load the first config file found in `dir`, or defaults if none exists.
    pub fn discover(dir: &Path) -> Result<Self> {
        match Self::find(dir) {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            None => {
                tracing::debug!("No config file in {}, using defaults", dir.display());
                Ok(Self::default())
            }
        }
    }

    /// Path of the config file `discover` would load.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    fn validate(&self) -> Result<()> {
        if let Some(ref platform) = self.platform
            && Platform::parse(platform).is_none()
        {
            return Err(Error::InvalidConfig(format!(
                "platform {:?} must be os/arch[/variant]",
                platform
            )));
        }

        if self.lock_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "lock_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// The pull ledger this configuration points at.
    pub fn ledger(&self) -> Result<Ledger> {
        let ledger = match self.ledger_path {
            Some(ref path) => Ledger::new(expand_home(path)?),
            None => Ledger::at_default_location()?,
        };
        Ok(ledger.with_lock_timeout(self.lock_timeout))
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };

    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(rest))
        .ok_or_else(|| Error::InvalidConfig("cannot expand ~ without a home directory".to_string()))
}
