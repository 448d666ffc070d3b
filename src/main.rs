//! # Conjur Secrets Provider
//!
//! Init or sidecar container that retrieves secrets from Conjur and delivers
//! them to the application pod.
//!
//! ## Overview
//!
//! 1. **Reads pod annotations** from the Downward API volume
//! 2. **Validates settings** from annotations and environment variables
//! 3. **Provides secrets** to Kubernetes Secrets or to rendered files, with retries
//! 4. **Refreshes secrets** periodically when running as a sidecar
//!
//! The container exits once secrets are provided in `init` and `application`
//! modes. In `sidecar` mode it keeps running until SIGTERM or Ctrl-C.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use kube::Client;
use secrets_provider::config::annotations::read_annotations_file;
use secrets_provider::config::settings::{parse_bool, ProviderConfig, StoreType};
use secrets_provider::constants::{
    DEBUG_LOGGING_KEY, DEFAULT_ANNOTATIONS_FILE, DEFAULT_SCRIPTS_SOURCE_DIR, DEFAULT_STATUS_DIR,
};
use secrets_provider::controller::repeatable::{RefreshConfig, RepeatableProvider};
use secrets_provider::controller::retry::RetryableProvider;
use secrets_provider::controller::status::FileStatusUpdater;
use secrets_provider::k8s_secrets::client::{K8sSecretsClient, KubeSecretsClient};
use secrets_provider::provider::conjur::{ConjurConfig, ConjurRetriever};
use secrets_provider::provider::new_provider_for_type;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Conjur Secrets Provider for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "secrets-provider", version, about, long_about = None)]
struct Args {
    /// Downward API file with the pod annotations
    #[arg(long, env = "ANNOTATIONS_FILE_PATH", default_value = DEFAULT_ANNOTATIONS_FILE)]
    annotations_file: PathBuf,

    /// Directory where status sentinel files and scripts are placed
    #[arg(long, env = "STATUS_DIR", default_value = DEFAULT_STATUS_DIR)]
    status_dir: PathBuf,

    /// Directory holding the status scripts baked into the image
    #[arg(long, env = "STATUS_SCRIPTS_DIR", default_value = DEFAULT_SCRIPTS_SOURCE_DIR)]
    scripts_dir: PathBuf,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat, debug: bool) {
    let default_level = if debug {
        "secrets_provider=debug,info"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Resolves once SIGTERM or Ctrl-C is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must happen before any TLS client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();

    // Annotations are read before tracing is set up, they control the log level
    let annotations = if args.annotations_file.exists() {
        read_annotations_file(&args.annotations_file)
    } else {
        Ok(HashMap::new())
    };
    let debug_logging = annotations
        .as_ref()
        .ok()
        .and_then(|a| a.get(DEBUG_LOGGING_KEY))
        .and_then(|v| parse_bool(v))
        .unwrap_or(false);
    init_tracing(args.log_format, debug_logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Conjur Secrets Provider");
    let annotations = annotations.context("Failed to read pod annotations")?;

    let config = match ProviderConfig::from_env(&annotations) {
        Ok(config) => config,
        Err(errors) => {
            for e in &errors {
                error!(error = %e, "Invalid configuration");
            }
            return Err(anyhow!("{} configuration error(s), see log for details", errors.len()));
        }
    };
    info!(
        destination = %config.store_type,
        mode = %config.container_mode,
        refresh_interval = ?config.refresh_interval,
        "Loaded configuration"
    );

    let conjur_config = ConjurConfig::from_env().context("Invalid Conjur connection settings")?;
    let retriever = Arc::new(ConjurRetriever::new(conjur_config).context("Failed to create Conjur client")?);

    let k8s_client: Option<Arc<dyn K8sSecretsClient>> = if config.store_type == StoreType::K8sSecrets {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Some(Arc::new(KubeSecretsClient::new(client)))
    } else {
        None
    };

    let provider = new_provider_for_type(&config, &annotations, retriever, k8s_client)
        .context("Failed to create secrets provider")?;
    let provider = RetryableProvider::new(provider, config.retry_interval, config.retry_count_limit);

    let (quit_tx, quit_rx) = oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = quit_tx.send(());
    });

    let status = Arc::new(FileStatusUpdater::new(&args.status_dir, &args.scripts_dir));
    let runner = RepeatableProvider::new(
        provider,
        status,
        RefreshConfig {
            mode: config.container_mode,
            refresh_interval: config.refresh_interval,
            quit: quit_rx,
        },
    );

    if let Err(e) = runner.run().await {
        error!(error = %e, "Secrets provider failed");
        return Err(e.into());
    }

    info!("Secrets provider finished");
    Ok(())
}
