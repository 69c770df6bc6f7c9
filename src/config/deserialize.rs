// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Builds normalized registry mirrors from a YAML map.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::types::RegistryMirrors;

pub fn deserialize_mirrors<'de, D>(deserializer: D) -> Result<RegistryMirrors, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: Option<BTreeMap<String, String>> = Option::deserialize(deserializer)?;
    let entries = entries.unwrap_or_default();

    for (source, mirror) in &entries {
        if source.trim().is_empty() || mirror.trim().is_empty() {
            return Err(serde::de::Error::custom(format!(
                "registry mirror entries need a source and a mirror, got {:?}: {:?}",
                source, mirror
            )));
        }
        if mirror.contains("://") {
            return Err(serde::de::Error::custom(format!(
                "registry mirror {:?} must be a host, not a URL",
                mirror
            )));
        }
    }

    Ok(RegistryMirrors::new(entries))
}
