// ABOUTME: Image fetching: pull policy, options, progress, and orchestration.
// ABOUTME: Entry point is Fetcher::fetch.

mod error;
mod fetcher;
mod image;
mod options;
mod policy;
mod progress;

pub use error::{FetchError, FetchErrorKind, ImageStore};
pub use fetcher::Fetcher;
pub use image::{ImageHandle, ImageOrigin};
pub use options::{FetchOptions, FetchSource, LayoutOption};
pub use policy::{ParsePullPolicyError, PullPolicy};
pub use progress::{
    ProgressRenderer, ProgressTarget, RenderError, drain, format_progress, human_size,
    progress_bar,
};
