// ABOUTME: Capability traits for the container daemon.
// ABOUTME: Defines DaemonImages and the types it exchanges.

mod image;
mod shared_types;

pub use image::{DaemonError, DaemonImages, PLATFORM_MISMATCH};
pub use shared_types::*;
