//! # Lifecycle Integration Tests
//!
//! Container modes, retries and periodic refresh wired together the way the
//! binary wires them.

mod common;

use common::{annotations, MockConjur, RecordingStatus};
use secrets_provider::config::settings::{ContainerMode, ProviderConfig};
use secrets_provider::constants::{SECRETS_PROVIDED_FILE, SECRETS_UPDATED_FILE, STATUS_SCRIPTS};
use secrets_provider::controller::repeatable::{RefreshConfig, RepeatableProvider};
use secrets_provider::controller::retry::RetryableProvider;
use secrets_provider::controller::status::{FileStatusUpdater, StatusUpdater};
use secrets_provider::provider::{new_provider_for_type, ProviderError, SecretsProvider};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time::sleep;

const GROUP_ANNOTATIONS: &[(&str, &str)] = &[
    ("conjur.org/secrets-destination", "file"),
    ("conjur.org/conjur-secrets.app", "- password: prod/password"),
];

/// File provider over `conjur`, writing under `dir/secrets`, with retries
fn retrying_file_provider(
    dir: &Path,
    conjur: &Arc<MockConjur>,
    extra: &[(&str, &str)],
) -> (ProviderConfig, RetryableProvider<Box<dyn SecretsProvider>>) {
    let mut pairs: Vec<(&str, &str)> = GROUP_ANNOTATIONS.to_vec();
    pairs.extend_from_slice(extra);
    let annotations = annotations(&pairs);
    let env = common::annotations(&[
        ("MY_POD_NAMESPACE", "app"),
        ("SECRETS_BASE_PATH", dir.join("secrets").to_str().unwrap()),
    ]);
    let config = ProviderConfig::from_lookup(&annotations, |k| env.get(k).cloned()).unwrap();
    let provider = new_provider_for_type(&config, &annotations, Arc::clone(conjur) as _, None).unwrap();
    let retrying = RetryableProvider::new(provider, config.retry_interval, config.retry_count_limit);
    (config, retrying)
}

fn status_dirs() -> (TempDir, FileStatusUpdater) {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    for script in STATUS_SCRIPTS {
        std::fs::write(scripts.join(script), "#!/bin/sh\n").unwrap();
    }
    let updater = FileStatusUpdater::new(dir.path().join("status"), &scripts);
    (dir, updater)
}

#[tokio::test(start_paused = true)]
async fn test_sidecar_refresh_writes_changes_and_marks_update() {
    let dir = tempfile::tempdir().unwrap();
    let conjur = MockConjur::with(&[("prod/password", "v1")]);
    let (config, provider) = retrying_file_provider(
        dir.path(),
        &conjur,
        &[
            ("conjur.org/container-mode", "sidecar"),
            ("conjur.org/secrets-refresh-interval", "1s"),
        ],
    );
    assert_eq!(config.container_mode, ContainerMode::Sidecar);

    let (status_dir, status) = status_dirs();
    let (quit_tx, quit_rx) = oneshot::channel();
    let runner = RepeatableProvider::new(
        provider,
        Arc::new(status),
        RefreshConfig {
            mode: config.container_mode,
            refresh_interval: config.refresh_interval,
            quit: quit_rx,
        },
    );
    let handle = tokio::spawn(runner.run());

    let secret_file = dir.path().join("secrets/app.yaml");
    let status_path = status_dir.path().join("status");

    sleep(Duration::from_millis(500)).await;
    assert!(status_path.join(SECRETS_PROVIDED_FILE).exists());
    assert!(status_path.join(STATUS_SCRIPTS[0]).exists());
    assert!(!status_path.join(SECRETS_UPDATED_FILE).exists());
    assert_eq!(std::fs::read_to_string(&secret_file).unwrap(), "\"password\": \"v1\"");

    // First tick at 1s finds nothing new
    sleep(Duration::from_secs(1)).await;
    assert!(!status_path.join(SECRETS_UPDATED_FILE).exists());

    conjur.set("prod/password", "v2");
    sleep(Duration::from_secs(1)).await;
    assert!(status_path.join(SECRETS_UPDATED_FILE).exists());
    assert_eq!(std::fs::read_to_string(&secret_file).unwrap(), "\"password\": \"v2\"");

    quit_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(conjur.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_init_mode_fails_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let conjur = MockConjur::with(&[]);
    conjur.fail_with(Some(500));
    let (config, provider) =
        retrying_file_provider(dir.path(), &conjur, &[("conjur.org/retry-count-limit", "2")]);
    assert_eq!(config.container_mode, ContainerMode::Init);

    let status = Arc::new(RecordingStatus::default());
    let (_quit_tx, quit_rx) = oneshot::channel();
    let runner = RepeatableProvider::new(
        provider,
        Arc::clone(&status) as Arc<dyn StatusUpdater>,
        RefreshConfig {
            mode: config.container_mode,
            refresh_interval: config.refresh_interval,
            quit: quit_rx,
        },
    );

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, ProviderError::Fetch(_)));
    assert!(err.to_string().contains("500"));
    assert_eq!(conjur.calls(), 3);
    assert_eq!(status.events(), vec!["scripts"]);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_access_during_refresh_stops_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let conjur = MockConjur::with(&[("prod/password", "v1")]);
    let (config, provider) = retrying_file_provider(
        dir.path(),
        &conjur,
        &[
            ("conjur.org/container-mode", "sidecar"),
            ("conjur.org/secrets-refresh-enabled", "true"),
            ("conjur.org/retry-count-limit", "0"),
        ],
    );
    assert_eq!(config.refresh_interval, Duration::from_secs(300));

    let status = Arc::new(RecordingStatus::default());
    let (_quit_tx, quit_rx) = oneshot::channel();
    let runner = RepeatableProvider::new(
        provider,
        Arc::clone(&status) as Arc<dyn StatusUpdater>,
        RefreshConfig {
            mode: config.container_mode,
            refresh_interval: config.refresh_interval,
            quit: quit_rx,
        },
    );
    let handle = tokio::spawn(runner.run());

    sleep(Duration::from_secs(1)).await;
    let secret_file = dir.path().join("secrets/app.yaml");
    assert!(secret_file.exists());

    conjur.fail_with(Some(403));
    let err = handle.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("403"));
    assert!(!secret_file.exists());
    assert_eq!(status.events(), vec!["scripts", "provided"]);
}
