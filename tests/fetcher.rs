// ABOUTME: Integration tests for Fetcher against in-memory daemon and registry doubles.
// ABOUTME: Covers pull policies, ledger gating, mirrors, registry and layout sources, cancellation.

mod support;

use chrono::{TimeDelta, Utc};
use pullwise::fetch::{
    FetchErrorKind, FetchOptions, Fetcher, ImageOrigin, ProgressTarget, PullPolicy,
};
use pullwise::ledger::{LedgerKey, LedgerRecord};
use pullwise::registry::{OciLayout, sha256_digest};
use pullwise::runtime::DaemonError;
use pullwise::types::{ImageRef, IntervalSpec, RegistryMirrors};
use std::time::Duration;
use support::{MockDaemon, MockRegistry, PullCall, ledger_in};
use tokio_util::sync::CancellationToken;

const ALPINE: &str = "docker.io/library/alpine:3.20";

fn fetcher(
    dir: &tempfile::TempDir,
    daemon: MockDaemon,
    registry: MockRegistry,
) -> Fetcher<MockDaemon, MockRegistry> {
    support::init_tracing();
    Fetcher::new(daemon, registry, ledger_in(dir)).with_progress(ProgressTarget::Hidden)
}

fn key(name: &str) -> String {
    let reference = ImageRef::parse(name).unwrap();
    LedgerKey::derive(&reference, &RegistryMirrors::default())
        .as_str()
        .to_string()
}

mod daemon_policies {
    use super::*;

    #[tokio::test]
    async fn never_with_absent_image_is_not_found_without_pull() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Never),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::NotFound);
        assert!(fetcher.daemon().pulls().is_empty());
    }

    #[tokio::test]
    async fn never_with_present_image_returns_it() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_image("alpine:3.20", "sha256:local");
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Never),
            )
            .await
            .unwrap();

        assert_eq!(handle.id(), "sha256:local");
        assert!(handle.is_daemon());
        assert!(fetcher.daemon().pulls().is_empty());
    }

    #[tokio::test]
    async fn if_not_present_with_present_image_leaves_ledger_alone() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_image("alpine:3.20", "sha256:local");
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::IfNotPresent),
            )
            .await
            .unwrap();

        assert_eq!(handle.id(), "sha256:local");
        assert!(fetcher.daemon().pulls().is_empty());
        assert!(!fetcher.ledger().path().exists());
    }

    #[tokio::test]
    async fn if_not_present_with_absent_image_pulls() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::IfNotPresent),
            )
            .await
            .unwrap();

        assert_eq!(handle.id(), sha256_digest(ALPINE.as_bytes()));
        assert_eq!(fetcher.daemon().pulls().len(), 1);
    }

    #[tokio::test]
    async fn always_pulls_even_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_image("alpine:3.20", "sha256:old");
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Always),
            )
            .await
            .unwrap();

        assert_eq!(
            fetcher.daemon().pulls(),
            vec![PullCall {
                reference: ALPINE.to_string(),
                platform: None,
            }]
        );
        assert_ne!(handle.id(), "sha256:old");
        assert!(!fetcher.ledger().path().exists());
    }

    #[tokio::test]
    async fn invalid_reference_is_rejected_before_any_daemon_call() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "Invalid Name",
                &FetchOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::InvalidReference);
        assert_eq!(fetcher.daemon().lookups(), 0);
    }
}

mod interval_policies {
    use super::*;

    #[tokio::test]
    async fn daily_with_stale_entry_pulls_and_refreshes_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_image("alpine:3.20", "sha256:old");
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());
        let key = key("alpine:3.20");

        let stale = Utc::now() - TimeDelta::hours(30);
        fetcher.ledger().record_pull(&key, stale).await.unwrap();

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap();

        assert_eq!(fetcher.daemon().pulls().len(), 1);
        let record = fetcher.ledger().read().await.unwrap();
        let last = record.last_pull(&key).unwrap().unwrap();
        assert!(Utc::now() - last < TimeDelta::minutes(1));
        assert_eq!(record.interval.pulling_interval, "1d");
    }

    #[tokio::test]
    async fn daily_with_recent_entry_uses_local_image() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_image("alpine:3.20", "sha256:local");
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());
        let key = key("alpine:3.20");

        let recent = Utc::now() - TimeDelta::hours(2);
        fetcher.ledger().record_pull(&key, recent).await.unwrap();

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap();

        assert_eq!(handle.id(), "sha256:local");
        assert!(fetcher.daemon().pulls().is_empty());
        let record = fetcher.ledger().read().await.unwrap();
        assert_eq!(
            record.last_pull(&key).unwrap().unwrap().timestamp(),
            recent.timestamp()
        );
    }

    #[tokio::test]
    async fn first_interval_pull_records_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());
        let spec = IntervalSpec::parse("2d12h").unwrap();

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Interval(spec)),
            )
            .await
            .unwrap();

        let record = fetcher.ledger().read().await.unwrap();
        assert_eq!(record.interval.pulling_interval, "2d12h");
        assert!(record.last_pull(&key("alpine:3.20")).unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_pruning_interval_does_not_block_the_pull() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());
        let mut record = LedgerRecord::default();
        record.interval.pulling_interval = "1d".to_string();
        record.interval.pruning_interval = "200000000d".to_string();
        fetcher.ledger().write(&record).await.unwrap();

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap();

        assert_eq!(handle.id(), sha256_digest(ALPINE.as_bytes()));
        assert_eq!(fetcher.daemon().pulls().len(), 1);
        let record = fetcher.ledger().read().await.unwrap();
        assert!(record.last_pull(&key("alpine:3.20")).unwrap().is_some());
        assert!(!record.interval.last_prune.is_empty());
    }

    #[tokio::test]
    async fn recent_entry_without_local_image_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());
        let key = key("alpine:3.20");
        fetcher
            .ledger()
            .record_pull(&key, Utc::now() - TimeDelta::minutes(5))
            .await
            .unwrap();

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Hourly),
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(fetcher.daemon().pulls().is_empty());
        let record = fetcher.ledger().read().await.unwrap();
        assert!(record.last_pull(&key).unwrap().is_none());

        // The next fetch is due again and pulls.
        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Hourly),
            )
            .await
            .unwrap();
        assert_eq!(fetcher.daemon().pulls().len(), 1);
    }

    #[tokio::test]
    async fn due_pull_prunes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());
        fetcher
            .ledger()
            .record_pull(&key("busybox:1"), Utc::now() - TimeDelta::days(10))
            .await
            .unwrap();

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Weekly),
            )
            .await
            .unwrap();

        let record = fetcher.ledger().read().await.unwrap();
        assert!(record.last_pull(&key("busybox:1")).unwrap().is_none());
        assert!(!record.interval.last_prune.is_empty());
    }

    #[tokio::test]
    async fn corrupt_ledger_does_not_block_the_pull() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());
        std::fs::create_dir_all(fetcher.ledger().path().parent().unwrap()).unwrap();
        std::fs::write(fetcher.ledger().path(), "{ not json").unwrap();

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap();

        assert_eq!(fetcher.daemon().pulls().len(), 1);
    }
}

mod pull_failures {
    use super::*;

    #[tokio::test]
    async fn platform_mismatch_retries_once_without_platform() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new().with_failure(DaemonError::from_message(
            ALPINE,
            "image with reference alpine:3.20 was found but does not match the specified platform",
        ));
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Always).with_platform("linux/arm64"),
            )
            .await
            .unwrap();

        let pulls = fetcher.daemon().pulls();
        assert_eq!(pulls.len(), 2);
        assert_eq!(pulls[0].platform.as_deref(), Some("linux/arm64"));
        assert_eq!(pulls[1].platform, None);
    }

    #[tokio::test]
    async fn second_platform_mismatch_fails_the_pull() {
        let dir = tempfile::tempdir().unwrap();
        let mismatch = || {
            DaemonError::from_message(ALPINE, "does not match the specified platform: linux/arm64")
        };
        let daemon = MockDaemon::new()
            .with_failure(mismatch())
            .with_failure(mismatch());
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Always).with_platform("linux/arm64"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::Pull);
        assert_eq!(fetcher.daemon().pulls().len(), 2);
    }

    #[tokio::test]
    async fn not_found_pull_falls_through_to_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new()
            .with_failure(DaemonError::from_message(ALPINE, "manifest unknown"));
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Always),
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn failed_interval_pull_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new()
            .with_failure(DaemonError::from_message(ALPINE, "unauthorized: authentication required"));
        let fetcher = fetcher(&dir, daemon, MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::Pull);
        let record = fetcher.ledger().read().await.unwrap();
        assert!(record.last_pull(&key("alpine:3.20")).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_a_hanging_pull() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::hanging(), MockRegistry::new());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch(&cancel, "alpine:3.20", &FetchOptions::daemon(PullPolicy::Daily)),
        )
        .await
        .expect("fetch should stop once cancelled")
        .unwrap_err();

        assert!(err.is_cancelled());
        let record = fetcher.ledger().read().await.unwrap();
        assert!(record.last_pull(&key("alpine:3.20")).unwrap().is_none());
    }
}

mod mirrors {
    use super::*;

    #[tokio::test]
    async fn pull_goes_to_mirror_and_ledger_keeps_logical_key() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new())
            .with_registry_mirrors(RegistryMirrors::new([("docker.io", "mirror.example.com")]));

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::daemon(PullPolicy::Daily),
            )
            .await
            .unwrap();

        assert_eq!(
            fetcher.daemon().pulls()[0].reference,
            "mirror.example.com/library/alpine:3.20"
        );
        assert_eq!(handle.reference.registry(), Some("mirror.example.com"));

        let record = fetcher.ledger().read().await.unwrap();
        let keys: Vec<&str> = record.images().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![ALPINE]);
    }

    #[tokio::test]
    async fn mirrored_name_shares_the_ledger_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new())
            .with_registry_mirrors(RegistryMirrors::new([("docker.io", "mirror.example.com")]));
        let options = FetchOptions::daemon(PullPolicy::Daily);

        fetcher
            .fetch(&CancellationToken::new(), "alpine:3.20", &options)
            .await
            .unwrap();
        fetcher
            .fetch(
                &CancellationToken::new(),
                "mirror.example.com/library/alpine:3.20",
                &options,
            )
            .await
            .unwrap();

        assert_eq!(fetcher.daemon().pulls().len(), 1);
    }

    const MIRRORED: &str = "mirror.example.com/library/alpine:3.20";

    #[tokio::test]
    async fn registry_source_resolves_through_the_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MockRegistry::new().with_image(MIRRORED, b"{}", &[b"layer"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry)
            .with_registry_mirrors(RegistryMirrors::new([("docker.io", "mirror.example.com")]));

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::registry(),
            )
            .await
            .unwrap();

        assert_eq!(
            fetcher.registry().resolved(),
            vec![(MIRRORED.to_string(), None)]
        );
        assert_eq!(handle.reference.canonical(), MIRRORED);
    }

    #[tokio::test]
    async fn layout_source_saves_under_the_mirrored_name() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let registry = MockRegistry::new().with_image(MIRRORED, b"{}", &[b"layer"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry)
            .with_registry_mirrors(RegistryMirrors::new([("docker.io", "mirror.example.com")]));

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::layout(out.path(), false),
            )
            .await
            .unwrap();

        assert_eq!(
            fetcher.registry().resolved(),
            vec![(MIRRORED.to_string(), None)]
        );
        let names = OciLayout::new(out.path()).ref_names().await.unwrap();
        assert_eq!(names, vec![MIRRORED.to_string()]);
        assert!(fetcher.daemon().pulls().is_empty());
    }
}

mod registry_source {
    use super::*;

    #[tokio::test]
    async fn resolves_without_touching_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MockRegistry::new().with_image("alpine:3.20", b"{}", &[b"layer"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry);

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::registry().with_platform("linux/arm64"),
            )
            .await
            .unwrap();

        let expected = fetcher.registry().image("alpine:3.20").digest.clone();
        assert!(matches!(handle.origin, ImageOrigin::Registry { ref digest, .. } if *digest == expected));
        assert_eq!(
            fetcher.registry().resolved(),
            vec![(ALPINE.to_string(), Some("linux/arm64".to_string()))]
        );
        assert_eq!(fetcher.daemon().lookups(), 0);
        assert!(fetcher.daemon().pulls().is_empty());
        assert!(!fetcher.ledger().path().exists());
    }

    #[tokio::test]
    async fn missing_remote_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(&dir, MockDaemon::new(), MockRegistry::new());

        let err = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::registry(),
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().contains("registry"));
    }
}

mod layout_source {
    use super::*;

    fn blob(root: &std::path::Path, digest: &str) -> std::path::PathBuf {
        root.join("blobs")
            .join("sha256")
            .join(digest.trim_start_matches("sha256:"))
    }

    #[tokio::test]
    async fn full_save_writes_every_blob() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let registry =
            MockRegistry::new().with_image("alpine:3.20", b"{\"os\":\"linux\"}", &[b"one", b"two"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry);

        let handle = fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::layout(out.path(), false),
            )
            .await
            .unwrap();

        let image = fetcher.registry().image("alpine:3.20");
        assert!(matches!(handle.origin, ImageOrigin::Layout { sparse: false, .. }));
        assert!(out.path().join("oci-layout").exists());
        assert!(blob(out.path(), &image.digest).exists());
        assert!(blob(out.path(), &image.config.digest).exists());
        for layer in &image.layers {
            assert!(blob(out.path(), &layer.digest).exists());
        }
        assert_eq!(fetcher.registry().fetched().len(), 2);
        assert!(fetcher.daemon().pulls().is_empty());

        let names = OciLayout::new(out.path()).ref_names().await.unwrap();
        assert_eq!(names, vec![ALPINE.to_string()]);
    }

    #[tokio::test]
    async fn sparse_save_skips_layers() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let registry = MockRegistry::new().with_image("alpine:3.20", b"{}", &[b"one"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry);

        fetcher
            .fetch(
                &CancellationToken::new(),
                "alpine:3.20",
                &FetchOptions::layout(out.path(), true),
            )
            .await
            .unwrap();

        let image = fetcher.registry().image("alpine:3.20");
        assert!(blob(out.path(), &image.digest).exists());
        assert!(blob(out.path(), &image.config.digest).exists());
        assert!(!blob(out.path(), &image.layers[0].digest).exists());
        assert!(fetcher.registry().fetched().is_empty());
    }

    #[tokio::test]
    async fn saving_the_same_reference_replaces_its_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let registry = MockRegistry::new()
            .with_image("alpine:3.20", b"{}", &[b"one"])
            .with_image("busybox:1", b"{\"b\":1}", &[b"two"]);
        let fetcher = fetcher(&dir, MockDaemon::new(), registry);
        let options = FetchOptions::layout(out.path(), true);

        for name in ["alpine:3.20", "busybox:1", "alpine:3.20"] {
            fetcher
                .fetch(&CancellationToken::new(), name, &options)
                .await
                .unwrap();
        }

        let mut names = OciLayout::new(out.path()).ref_names().await.unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![ALPINE.to_string(), "docker.io/library/busybox:1".to_string()]
        );
    }
}
