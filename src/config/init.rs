// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates a commented pullwise.yml template.

use std::path::Path;

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, template_yaml())?;

    Ok(())
}

/// Template written by `pullwise init`. Parses to the default config.
pub fn template_yaml() -> &'static str {
    r#"# When to pull: always, never, if-not-present, hourly, daily, weekly,
# or interval=<n>d<n>h<n>m (e.g. interval=2d12h)
pull_policy: always

# Default platform for pulls (os/arch[/variant])
# platform: linux/amd64

# Pull through mirrors; "*" applies to every registry
# registry_mirrors:
#   docker.io: mirror.example.com
#   "*": cache.internal:5000

# Registries reached over plain HTTP
# insecure_registries:
#   - localhost:5000

# Pull ledger location (default: ~/.pack/image.json)
# ledger_path: ~/.pack/image.json
# lock_timeout: 5s

# Container runtime override (default: auto-detect Podman, then Docker)
# runtime:
#   runtime: podman
#   socket: /run/podman/podman.sock
#   tls_verify: true
"#
}
