// ABOUTME: Registry mirror rewriting for image references.
// ABOUTME: Maps source registries (or `*`) to mirror hosts and back.

use super::image_ref::{ImageRef, normalize_registry};
use std::collections::BTreeMap;

/// Mirror key that applies to every registry.
pub const WILDCARD: &str = "*";

/// Configured registry mirrors, keyed by normalized source registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryMirrors {
    mirrors: BTreeMap<String, String>,
}

impl RegistryMirrors {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mirrors = entries
            .into_iter()
            .map(|(source, mirror)| {
                (
                    normalize_registry(source.as_ref()).to_string(),
                    mirror.as_ref().trim_end_matches('/').to_string(),
                )
            })
            .collect();
        Self { mirrors }
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Mirror serving `reference`, if any. The wildcard wins over a
    /// per-registry entry.
    pub fn mirror_for(&self, reference: &ImageRef) -> Option<&str> {
        self.mirrors
            .get(WILDCARD)
            .or_else(|| self.mirrors.get(reference.registry_or_default()))
            .map(String::as_str)
    }

    /// Rewrite `reference` to its mirror, or return it unchanged.
    pub fn translate(&self, reference: &ImageRef) -> ImageRef {
        match self.mirror_for(reference) {
            Some(mirror) => {
                let rewritten = reference.with_registry(mirror);
                tracing::info!("Using mirror {} for {}", rewritten, reference);
                rewritten
            }
            None => reference.clone(),
        }
    }

    /// Map a reference that already points at a mirror back to the
    /// registry it mirrors. Wildcard mirrors have no single origin and are
    /// left alone.
    pub fn origin_of(&self, reference: &ImageRef) -> Option<ImageRef> {
        let location = format!("{}/{}", reference.registry_or_default(), reference.name());

        self.mirrors
            .iter()
            .filter(|(source, _)| source.as_str() != WILDCARD)
            .find_map(|(source, mirror)| {
                let repository = location.strip_prefix(mirror.as_str())?.strip_prefix('/')?;
                let mut origin = format!("{}/{}", source, repository);
                if let Some(tag) = reference.tag() {
                    origin.push(':');
                    origin.push_str(tag);
                }
                if let Some(digest) = reference.digest() {
                    origin.push('@');
                    origin.push_str(digest);
                }
                ImageRef::parse(&origin).ok()
            })
    }
}
