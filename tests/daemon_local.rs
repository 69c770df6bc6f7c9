// ABOUTME: Integration tests against the local Docker or Podman daemon.
// ABOUTME: Skipped when no runtime socket is available.

mod support;

use futures::StreamExt;
use pullwise::fetch::{FetchOptions, Fetcher, ProgressTarget, PullPolicy};
use pullwise::registry::OciRegistry;
use pullwise::runtime::{self, BollardDaemon, DaemonImages, RuntimeConfig};
use pullwise::types::ImageRef;
use tokio_util::sync::CancellationToken;

const SMALL_IMAGE: &str = "docker.io/library/busybox:1.36";

fn local_daemon() -> Option<BollardDaemon> {
    runtime::connect(&RuntimeConfig::default()).ok()
}

macro_rules! require_runtime {
    () => {
        match local_daemon() {
            Some(daemon) => daemon,
            None => {
                eprintln!("Skipping test: no local container runtime found");
                return;
            }
        }
    };
}

#[tokio::test]
async fn lookup_of_unknown_image_is_none() {
    let daemon = require_runtime!();
    let reference = ImageRef::parse("localhost/pullwise-does-not-exist:never").unwrap();

    let found = daemon.lookup_image(&reference).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn pull_stream_reports_progress_and_image_appears() {
    let daemon = require_runtime!();
    let reference = ImageRef::parse(SMALL_IMAGE).unwrap();

    let mut stream = daemon
        .pull_image_stream(&reference, None, None)
        .await
        .unwrap();
    let mut messages = 0;
    while let Some(item) = stream.next().await {
        item.unwrap();
        messages += 1;
    }
    assert!(messages > 0);

    let image = daemon.lookup_image(&reference).await.unwrap().unwrap();
    assert!(image.id.starts_with("sha256:"));
    assert!(!image.os.is_empty());
}

#[tokio::test]
async fn fetch_if_not_present_through_the_daemon() {
    support::init_tracing();
    let daemon = require_runtime!();
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Fetcher::new(daemon, OciRegistry::new(), support::ledger_in(&dir))
        .with_progress(ProgressTarget::Hidden);

    let handle = fetcher
        .fetch(
            &CancellationToken::new(),
            SMALL_IMAGE,
            &FetchOptions::daemon(PullPolicy::IfNotPresent),
        )
        .await
        .unwrap();

    assert!(handle.is_daemon());
    assert!(handle.id().starts_with("sha256:"));
}
