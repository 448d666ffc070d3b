//! # Repeatable Provider
//!
//! Top-level lifecycle of the secrets provider:
//!
//! 1. Copy the status scripts and provide secrets once. A failure here is
//!    returned immediately, whatever the container mode.
//! 2. Record that secrets were provided.
//! 3. Depending on the mode:
//!    - `init` / `application`: return
//!    - `sidecar` without refresh: wait for the quit signal
//!    - `sidecar` with refresh: run a [`PeriodicRefresher`] until the quit
//!      signal arrives or a refresh fails
//!
//! The quit signal is a oneshot channel; dropping its sender counts as quit.

use super::status::StatusUpdater;
use crate::config::settings::ContainerMode;
use crate::constants::REFRESH_SHUTDOWN_GRACE_PERIOD;
use crate::provider::{ProviderError, SecretsProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Scheduling settings, fixed for the life of the process
#[derive(Debug)]
pub struct RefreshConfig {
    pub mode: ContainerMode,
    /// Zero disables periodic refresh
    pub refresh_interval: Duration,
    pub quit: oneshot::Receiver<()>,
}

/// Background task re-providing secrets on a fixed period
///
/// Ticks never overlap: a slow pass delays the following tick instead of
/// queuing extra ones. The first tick fires one period after [`start`].
///
/// [`start`]: PeriodicRefresher::start
#[derive(Debug)]
pub struct PeriodicRefresher {
    quit: Option<oneshot::Sender<()>>,
    errors: mpsc::Receiver<ProviderError>,
    handle: JoinHandle<()>,
}

impl PeriodicRefresher {
    pub fn start<P>(provider: P, status: Arc<dyn StatusUpdater>, period: Duration) -> Self
    where
        P: SecretsProvider + 'static,
    {
        let (quit_tx, quit_rx) = oneshot::channel();
        let (error_tx, error_rx) = mpsc::channel(1);

        info!(period_ms = period.as_millis(), "Starting periodic secrets refresh");
        let handle = tokio::spawn(refresh_loop(provider, status, period, quit_rx, error_tx));

        Self {
            quit: Some(quit_tx),
            errors: error_rx,
            handle,
        }
    }

    /// Wait for the refresh loop to report a failure
    ///
    /// Returns `None` if the loop ended without one.
    pub async fn next_error(&mut self) -> Option<ProviderError> {
        self.errors.recv().await
    }

    /// Signal the loop to quit and give it a short grace period to exit
    ///
    /// A loop still busy after the grace period is aborted, so this never
    /// waits for a pending tick or a slow provide pass.
    pub async fn stop(mut self) {
        if let Some(quit) = self.quit.take() {
            // Loop may already have exited after reporting an error
            let _ = quit.send(());
        }
        match timeout(REFRESH_SHUTDOWN_GRACE_PERIOD, &mut self.handle).await {
            Ok(_) => debug!("Periodic secrets refresh stopped"),
            Err(_) => {
                warn!("Periodic secrets refresh did not stop within the grace period, aborting");
                self.handle.abort();
            }
        }
    }
}

async fn refresh_loop<P: SecretsProvider>(
    mut provider: P,
    status: Arc<dyn StatusUpdater>,
    period: Duration,
    mut quit: oneshot::Receiver<()>,
    errors: mpsc::Sender<ProviderError>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut quit => return,
            _ = ticker.tick() => {
                debug!("Refreshing secrets");
                let result = provider.provide().await.into_result().and_then(|updated| {
                    if updated {
                        status.set_secrets_updated()?;
                    }
                    Ok(())
                });
                if let Err(err) = result {
                    error!(error = %err, "Periodic secrets refresh failed");
                    let _ = errors.send(err).await;
                    return;
                }
            }
        }
    }
}

/// Runs a provider according to its [`RefreshConfig`]
#[derive(Debug)]
pub struct RepeatableProvider<P> {
    provider: P,
    status: Arc<dyn StatusUpdater>,
    config: RefreshConfig,
}

impl<P: SecretsProvider + 'static> RepeatableProvider<P> {
    pub fn new(provider: P, status: Arc<dyn StatusUpdater>, config: RefreshConfig) -> Self {
        Self {
            provider,
            status,
            config,
        }
    }

    pub async fn run(self) -> Result<(), ProviderError> {
        let Self {
            mut provider,
            status,
            config,
        } = self;
        let RefreshConfig {
            mode,
            refresh_interval,
            mut quit,
        } = config;

        status.copy_scripts()?;
        provider.provide().await.into_result()?;
        status.set_secrets_provided()?;
        info!(mode = %mode, "Secrets provided");

        if mode != ContainerMode::Sidecar {
            return Ok(());
        }

        if refresh_interval.is_zero() {
            info!("Secrets refresh disabled, waiting for quit signal");
            let _ = quit.await;
            return Ok(());
        }

        let mut refresher = PeriodicRefresher::start(provider, Arc::clone(&status), refresh_interval);
        let result = tokio::select! {
            _ = &mut quit => {
                info!("Received quit signal, stopping secrets refresh");
                Ok(())
            }
            err = refresher.next_error() => err.map_or(Ok(()), Err),
        };
        refresher.stop().await;
        result
    }
}
