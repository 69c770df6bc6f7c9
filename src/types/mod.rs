// ABOUTME: Validated domain types shared across the crate.
// ABOUTME: Image references, registry mirrors, and interval specifications.

mod image_ref;
mod interval;
mod mirror;

pub use image_ref::{DEFAULT_REGISTRY, ImageRef, ParseImageRefError, normalize_registry};
pub use interval::{IntervalSpec, ParseIntervalError, parse_interval};
pub use mirror::{RegistryMirrors, WILDCARD};
