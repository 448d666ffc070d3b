//! # Kubernetes Secrets Provider
//!
//! Fills data entries of existing Kubernetes Secrets with Conjur values.
//!
//! Each required Secret carries a `conjur-map` data entry, a YAML map of data
//! key to Conjur variable path:
//!
//! ```yaml
//! username: prod/db/username
//! password: prod/db/password
//! ```
//!
//! One variable may feed several Secrets, under different keys. All
//! variables are fetched in one batch and fanned out to every destination.

use super::client::{K8sSecretsClient, SecretData};
use crate::constants::CONJUR_MAP_KEY;
use crate::controller::checksum::{Checksum, ChecksumStore};
use crate::provider::{
    ProvideOutcome, ProviderError, RetrieveError, SecretRetriever, SecretValues, SecretsProvider,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};
use zeroize::Zeroizing;

/// Kubernetes Secrets mode failures
///
/// Kubernetes API error details are logged at debug level only and never
/// carried in these messages.
#[derive(Error, Debug)]
pub enum K8sError {
    #[error("failed to retrieve Kubernetes Secret {namespace}/{name}")]
    Retrieve { namespace: String, name: String },
    #[error("failed to update Kubernetes Secret {namespace}/{name}")]
    Update { namespace: String, name: String },
    #[error("Kubernetes Secret {name:?} has no valid {key:?} data entry: {reason}", key = CONJUR_MAP_KEY)]
    InvalidConjurMap { name: String, reason: String },
    #[error("no Conjur variables are referenced by the required Kubernetes Secrets")]
    NoVariables,
    #[error("failed to retrieve Conjur secrets: {0}")]
    Fetch(#[from] RetrieveError),
    #[error("Conjur variable {path:?} missing from batch retrieval response")]
    MissingVariable { path: String },
}

impl K8sError {
    /// True only for a Conjur 403 or 404 answer to the batch retrieval
    #[must_use]
    pub fn is_revoked_access(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_revoked_access())
    }
}

/// One place a retrieved value is written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDestination {
    pub k8s_secret_name: String,
    pub key: String,
}

/// Secrets and variable fan-out gathered for a single provide pass
#[derive(Debug, Default)]
struct K8sSecretsState {
    /// Secret snapshots, so updates do not clobber unrelated data keys
    original_secrets: BTreeMap<String, Secret>,
    /// Variable path to every destination that needs its value
    update_destinations: BTreeMap<String, Vec<UpdateDestination>>,
}

/// Parse a `conjur-map` entry into data key to variable path
pub fn parse_conjur_map(
    k8s_secret_name: &str,
    raw: &[u8],
) -> Result<BTreeMap<String, String>, K8sError> {
    let invalid = |reason: &str| K8sError::InvalidConjurMap {
        name: k8s_secret_name.to_string(),
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("value is empty"));
    }
    let map: BTreeMap<String, String> = serde_yaml::from_slice(raw)
        .map_err(|e| invalid(&format!("expected a YAML map of key to variable path: {e}")))?;
    if map.is_empty() {
        return Err(invalid("value is empty"));
    }
    Ok(map)
}

/// Kubernetes Secrets [`SecretsProvider`]
pub struct K8sProvider {
    retriever: Arc<dyn SecretRetriever>,
    client: Arc<dyn K8sSecretsClient>,
    sanitize_enabled: bool,
    pod_namespace: String,
    required_k8s_secrets: Vec<String>,
    checksums: ChecksumStore,
}

impl fmt::Debug for K8sProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("K8sProvider")
            .field("pod_namespace", &self.pod_namespace)
            .field("required_k8s_secrets", &self.required_k8s_secrets)
            .field("sanitize_enabled", &self.sanitize_enabled)
            .finish_non_exhaustive()
    }
}

impl K8sProvider {
    #[must_use]
    pub fn new(
        retriever: Arc<dyn SecretRetriever>,
        client: Arc<dyn K8sSecretsClient>,
        sanitize_enabled: bool,
        pod_namespace: String,
        required_k8s_secrets: Vec<String>,
    ) -> Self {
        Self {
            retriever,
            client,
            sanitize_enabled,
            pod_namespace,
            required_k8s_secrets,
            checksums: ChecksumStore::new(),
        }
    }

    /// Read every required Secret and invert their `conjur-map` entries
    async fn retrieve_required_secrets(&self) -> Result<K8sSecretsState, K8sError> {
        let mut state = K8sSecretsState::default();
        for name in &self.required_k8s_secrets {
            let secret = self.client.retrieve_secret(&self.pod_namespace, name).await?;

            let raw = secret
                .data
                .as_ref()
                .and_then(|data| data.get(CONJUR_MAP_KEY))
                .ok_or_else(|| K8sError::InvalidConjurMap {
                    name: name.clone(),
                    reason: "entry does not exist".to_string(),
                })?;
            debug!(k8s_secret = %name, key = CONJUR_MAP_KEY, "Parsing Conjur map entry");
            let conjur_map = parse_conjur_map(name, &raw.0)?;

            for (key, path) in conjur_map {
                state
                    .update_destinations
                    .entry(path)
                    .or_default()
                    .push(UpdateDestination {
                        k8s_secret_name: name.clone(),
                        key,
                    });
            }
            state.original_secrets.insert(name.clone(), secret);
        }
        Ok(state)
    }

    /// Write `values` to every destination of `state`
    ///
    /// Returns whether any Secret changed, plus every failure. A failure for
    /// one Secret does not stop updates to the others.
    async fn update_required_secrets(
        &mut self,
        state: &K8sSecretsState,
        values: &SecretValues,
    ) -> (bool, Vec<K8sError>) {
        let mut errors = Vec::new();
        let mut new_data: BTreeMap<&str, SecretData> = BTreeMap::new();
        let mut incomplete = BTreeSet::new();

        for (path, destinations) in &state.update_destinations {
            match values.get(path) {
                Some(value) => {
                    for dest in destinations {
                        new_data
                            .entry(dest.k8s_secret_name.as_str())
                            .or_default()
                            .insert(dest.key.clone(), Zeroizing::new(value.to_vec()));
                    }
                }
                None => {
                    errors.push(K8sError::MissingVariable { path: path.clone() });
                    incomplete.extend(destinations.iter().map(|d| d.k8s_secret_name.as_str()));
                }
            }
        }

        let mut updated = false;
        for (name, data) in new_data {
            if incomplete.contains(name) {
                continue;
            }
            let Some(original) = state.original_secrets.get(name) else {
                continue;
            };

            let checksum = Checksum::of_entries(data.iter().map(|(k, v)| (k.as_str(), v.as_slice())));
            if !self.checksums.changed(name, &checksum) {
                info!(k8s_secret = %name, "Kubernetes Secret content unchanged, skipping update");
                continue;
            }

            match self
                .client
                .update_secret(&self.pod_namespace, name, original, &data)
                .await
            {
                Ok(()) => {
                    self.checksums.record(name, checksum);
                    updated = true;
                }
                Err(err) => {
                    error!(k8s_secret = %name, error = %err, "Failed to update Kubernetes Secret");
                    errors.push(err);
                }
            }
        }
        (updated, errors)
    }
}

#[async_trait]
impl SecretsProvider for K8sProvider {
    async fn provide(&mut self) -> ProvideOutcome {
        let span = info_span!(
            "secrets.k8s_secrets",
            namespace = %self.pod_namespace,
            k8s_secrets.count = self.required_k8s_secrets.len()
        );

        async move {
            let state = match self.retrieve_required_secrets().await {
                Ok(state) => state,
                Err(err) => {
                    error!(error = %err, "Failed to gather required Kubernetes Secrets");
                    return ProvideOutcome::failure(false, err);
                }
            };

            let paths: Vec<String> = state.update_destinations.keys().cloned().collect();
            if paths.is_empty() {
                return ProvideOutcome::failure(false, K8sError::NoVariables);
            }

            let values = match self.retriever.retrieve_secrets(&paths).await {
                Ok(values) => values,
                Err(err) => {
                    let err = K8sError::Fetch(err);
                    if !(self.sanitize_enabled && err.is_revoked_access()) {
                        error!(error = %err, "Failed to fetch Conjur secrets");
                        return ProvideOutcome::failure(false, err);
                    }

                    info!("Conjur denied access or reported a missing variable, clearing Kubernetes Secret values");
                    let empty: SecretValues = paths
                        .into_iter()
                        .map(|path| (path, Zeroizing::new(Vec::new())))
                        .collect();
                    let (_, mut errors) = self.update_required_secrets(&state, &empty).await;
                    if !errors.is_empty() {
                        error!(count = errors.len(), "Failed to clear some Kubernetes Secret values");
                    }
                    errors.insert(0, err);
                    return ProvideOutcome::failure(true, ProviderError::K8s(errors));
                }
            };

            let (updated, errors) = self.update_required_secrets(&state, &values).await;
            if errors.is_empty() {
                info!(updated, "Provided secrets to Kubernetes Secrets");
                ProvideOutcome::success(updated)
            } else {
                ProvideOutcome::failure(updated, ProviderError::K8s(errors))
            }
        }
        .instrument(span)
        .await
    }
}
