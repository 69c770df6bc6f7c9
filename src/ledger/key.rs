// ABOUTME: Canonical ledger keys derived from image references.
// ABOUTME: The same logical image maps to one key whatever form it was named in.

use crate::types::{ImageRef, RegistryMirrors};
use std::fmt;

/// Key under which an image's last pull is recorded.
///
/// Derived from the logical image: a reference that already points at a
/// configured mirror is mapped back to the registry it mirrors, Docker Hub
/// defaults are made explicit, and a digest is dropped when a tag names the
/// image. Digest-only references keep the digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey(String);

impl LedgerKey {
    pub fn derive(reference: &ImageRef, mirrors: &RegistryMirrors) -> Self {
        let logical = mirrors
            .origin_of(reference)
            .unwrap_or_else(|| reference.clone());

        let mut key = format!("{}/{}", logical.registry_or_default(), logical.repository());
        match (logical.tag(), logical.digest()) {
            (Some(tag), _) => {
                key.push(':');
                key.push_str(tag);
            }
            (None, Some(digest)) => {
                key.push('@');
                key.push_str(digest);
            }
            (None, None) => {}
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
