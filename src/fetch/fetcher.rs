// ABOUTME: Fetch orchestration across daemon, registry, and OCI layout.
// ABOUTME: Applies mirrors and the pull policy, pulls with progress, and keeps the ledger.

use chrono::Utc;
use snafu::{OptionExt, ResultExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::error::{
    AuthSnafu, CancelledSnafu, DaemonSnafu, FetchError, ImageStore, InvalidReferenceSnafu,
    LayoutSnafu, NotFoundSnafu, ProgressSnafu, PullSnafu, RegistrySnafu,
};
use super::image::{ImageHandle, ImageOrigin};
use super::options::{FetchOptions, FetchSource, LayoutOption};
use super::policy::PullPolicy;
use super::progress::{ProgressTarget, RenderError, drain};
use crate::credentials::{Anonymous, CredentialResolver, RegistryAuth};
use crate::ledger::{Ledger, LedgerKey};
use crate::registry::{OciLayout, RegistryImages};
use crate::runtime::{DaemonImages, LocalImage};
use crate::types::{ImageRef, IntervalSpec, RegistryMirrors};

/// Obtains images from the daemon, a registry, or into an OCI layout.
pub struct Fetcher<D, R> {
    daemon: D,
    registry: R,
    ledger: Ledger,
    mirrors: RegistryMirrors,
    keychain: Box<dyn CredentialResolver>,
    progress: ProgressTarget,
}

impl<D, R> Fetcher<D, R>
where
    D: DaemonImages,
    R: RegistryImages,
{
    pub fn new(daemon: D, registry: R, ledger: Ledger) -> Self {
        Self {
            daemon,
            registry,
            ledger,
            mirrors: RegistryMirrors::default(),
            keychain: Box::new(Anonymous),
            progress: ProgressTarget::default(),
        }
    }

    pub fn with_registry_mirrors(mut self, mirrors: RegistryMirrors) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_keychain(mut self, keychain: impl CredentialResolver + 'static) -> Self {
        self.keychain = Box::new(keychain);
        self
    }

    pub fn with_progress(mut self, target: ProgressTarget) -> Self {
        self.progress = target;
        self
    }

    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Obtain `name` according to `options`.
    ///
    /// The ledger key is derived from the name as given; mirror rewriting
    /// then decides where the image is actually fetched from. Ledger
    /// failures are logged and never fail the fetch.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        name: &str,
        options: &FetchOptions,
    ) -> Result<ImageHandle, FetchError> {
        let logical = ImageRef::parse(name).context(InvalidReferenceSnafu { reference: name })?;
        let key = LedgerKey::derive(&logical, &self.mirrors);
        let reference = self.mirrors.translate(&logical);
        let platform = options.platform.as_deref();

        match options.source() {
            FetchSource::Layout(layout) => {
                self.fetch_layout(cancel, &reference, platform, &layout)
                    .await
            }
            FetchSource::Registry => self.fetch_registry(cancel, &reference, platform).await,
            FetchSource::Daemon(policy) => {
                self.fetch_daemon(cancel, &reference, &key, &policy, platform)
                    .await
            }
        }
    }

    async fn fetch_layout(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
        layout: &LayoutOption,
    ) -> Result<ImageHandle, FetchError> {
        let auth = self.credentials(reference).await?;
        let image = self
            .resolve_remote(cancel, reference, platform, auth.as_ref())
            .await?;

        let out = OciLayout::new(&layout.path);
        cancellable(cancel, reference, async {
            out.save(&self.registry, reference, &image, layout.sparse, auth.as_ref())
                .await
                .context(LayoutSnafu {
                    reference: reference.to_string(),
                    path: layout.path.clone(),
                })
        })
        .await?;

        tracing::debug!(
            "Saved {} ({}) to {}",
            reference,
            image.digest,
            layout.path.display()
        );
        Ok(ImageHandle::new(
            reference.clone(),
            ImageOrigin::Layout {
                path: layout.path.clone(),
                digest: image.digest,
                sparse: layout.sparse,
            },
        ))
    }

    async fn fetch_registry(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
    ) -> Result<ImageHandle, FetchError> {
        let auth = self.credentials(reference).await?;
        let image = self
            .resolve_remote(cancel, reference, platform, auth.as_ref())
            .await?;

        Ok(ImageHandle::new(
            reference.clone(),
            ImageOrigin::Registry {
                digest: image.digest,
                media_type: image.media_type,
            },
        ))
    }

    async fn fetch_daemon(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        key: &LedgerKey,
        policy: &PullPolicy,
        platform: Option<&str>,
    ) -> Result<ImageHandle, FetchError> {
        if let Some(interval) = policy.interval() {
            return self
                .fetch_gated(cancel, reference, key, &interval, platform)
                .await;
        }

        match policy {
            PullPolicy::Never => self.local_image(cancel, reference).await,
            PullPolicy::IfNotPresent => match self.lookup(cancel, reference).await? {
                Some(image) => {
                    tracing::debug!("{} is present, not pulling", reference);
                    Ok(daemon_handle(reference, image))
                }
                None => self.pull_and_lookup(cancel, reference, platform).await,
            },
            _ => self.pull_and_lookup(cancel, reference, platform).await,
        }
    }

    async fn fetch_gated(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        key: &LedgerKey,
        interval: &IntervalSpec,
        platform: Option<&str>,
    ) -> Result<ImageHandle, FetchError> {
        if let Err(e) = self.ledger.set_pulling_interval(interval).await {
            tracing::warn!("Failed to store pulling interval {}: {}", interval, e);
        }

        let due = match self.ledger.check_interval(key.as_str()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("Failed to check pull ledger for {}: {}", key, e);
                true
            }
        };

        if !due {
            tracing::debug!("{} was pulled within {}, not pulling", key, interval);
            let result = self.local_image(cancel, reference).await;
            if let Err(ref e) = result
                && e.is_not_found()
            {
                match self.ledger.evict(key.as_str()).await {
                    Ok(_) => tracing::debug!("Evicted {} from the pull ledger", key),
                    Err(e) => tracing::warn!("Failed to evict {} from pull ledger: {}", key, e),
                }
            }
            return result;
        }

        if let Err(e) = self.ledger.prune().await {
            tracing::warn!("Failed to prune pull ledger: {}", e);
        }

        let handle = self.pull_and_lookup(cancel, reference, platform).await?;

        if let Err(e) = self.ledger.record_pull(key.as_str(), Utc::now()).await {
            tracing::warn!("Failed to record pull of {}: {}", key, e);
        }
        Ok(handle)
    }

    async fn pull_and_lookup(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
    ) -> Result<ImageHandle, FetchError> {
        self.pull(cancel, reference, platform).await?;
        self.local_image(cancel, reference).await
    }

    /// Pull through the daemon, retrying once without a platform when the
    /// daemon rejects the requested one. A not-found pull is tolerated; the
    /// lookup that follows decides.
    async fn pull(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
    ) -> Result<(), FetchError> {
        let auth = self.credentials(reference).await?;

        tracing::debug!("Pulling {}", reference);
        let mut result = self
            .pull_once(cancel, reference, platform, auth.as_ref())
            .await;

        let mismatch = match &result {
            Err(RenderError::Stream(e)) if platform.is_some() && e.is_platform_mismatch() => {
                Some(e.to_string())
            }
            _ => None,
        };
        if let Some(message) = mismatch {
            tracing::warn!("{}; retrying without a platform", message);
            result = self
                .pull_once(cancel, reference, None, auth.as_ref())
                .await;
        }

        match result {
            Ok(()) => Ok(()),
            Err(RenderError::Stream(e)) if e.is_not_found() => {
                tracing::debug!("Pull of {} reported not found: {}", reference, e);
                Ok(())
            }
            Err(RenderError::Stream(e)) => Err(e).context(PullSnafu {
                reference: reference.to_string(),
            }),
            Err(RenderError::Cancelled) => CancelledSnafu {
                reference: reference.to_string(),
            }
            .fail(),
            Err(RenderError::Io(e)) => Err(e).context(ProgressSnafu),
        }
    }

    async fn pull_once(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RenderError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RenderError::Cancelled),
            stream = self.daemon.pull_image_stream(reference, platform, auth) => stream?,
        };

        let mut renderer = self.progress.renderer();
        drain(stream, &mut renderer, cancel).await
    }

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
    ) -> Result<Option<LocalImage>, FetchError> {
        cancellable(cancel, reference, async {
            self.daemon
                .lookup_image(reference)
                .await
                .context(DaemonSnafu {
                    reference: reference.to_string(),
                })
        })
        .await
    }

    /// The daemon's copy of `reference`, or `NotFound`.
    async fn local_image(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
    ) -> Result<ImageHandle, FetchError> {
        let image = self.lookup(cancel, reference).await?.context(NotFoundSnafu {
            reference: reference.to_string(),
            store: ImageStore::Daemon,
        })?;
        Ok(daemon_handle(reference, image))
    }

    async fn resolve_remote(
        &self,
        cancel: &CancellationToken,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<crate::registry::RemoteImage, FetchError> {
        let image = cancellable(cancel, reference, async {
            self.registry
                .resolve(reference, platform, auth)
                .await
                .context(RegistrySnafu {
                    reference: reference.to_string(),
                })
        })
        .await?;

        image.context(NotFoundSnafu {
            reference: reference.to_string(),
            store: ImageStore::Registry,
        })
    }

    async fn credentials(&self, reference: &ImageRef) -> Result<Option<RegistryAuth>, FetchError> {
        self.keychain
            .resolve(reference)
            .await
            .context(AuthSnafu {
                reference: reference.to_string(),
            })
    }
}

fn daemon_handle(reference: &ImageRef, image: LocalImage) -> ImageHandle {
    ImageHandle::new(reference.clone(), ImageOrigin::Daemon(image))
}

/// Run `operation` unless `cancel` fires first.
async fn cancellable<T, F>(
    cancel: &CancellationToken,
    reference: &ImageRef,
    operation: F,
) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => CancelledSnafu { reference: reference.to_string() }.fail(),
        result = operation => result,
    }
}
