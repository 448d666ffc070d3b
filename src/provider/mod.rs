//! # Provider Modules
//!
//! Traits at the two seams of the pipeline:
//!
//! - [`SecretRetriever`] fetches a batch of variables from Conjur
//! - [`SecretsProvider`] runs one full fetch-and-deliver pass for a destination
//!
//! plus the error types shared by the file and Kubernetes Secrets providers.

use crate::config::settings::{ProviderConfig, StoreType};
use crate::controller::status::StatusError;
use crate::k8s_secrets::client::K8sSecretsClient;
use crate::k8s_secrets::provider::{K8sError, K8sProvider};
use crate::push_to_file::fetch::FetchError;
use crate::push_to_file::provider::{FileProvider, GroupError};
use crate::push_to_file::secret_group::SecretGroupError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod conjur;

/// Secret values keyed by variable path
pub type SecretValues = HashMap<String, Zeroizing<Vec<u8>>>;

/// Errors raised while retrieving secrets from Conjur
///
/// Only [`RetrieveError::Status`] carries a Conjur answer; see
/// [`RetrieveError::is_revoked_access`].
#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("failed to read Conjur access token from {path}: {source}")]
    AccessToken {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to send batch retrieval request to Conjur: {0}")]
    Request(String),
    #[error("Conjur batch retrieval failed with HTTP status {status}")]
    Status { status: u16 },
    #[error("invalid batch retrieval response from Conjur: {0}")]
    Response(String),
    #[error("invalid Conjur client configuration: {0}")]
    Config(String),
}

impl RetrieveError {
    /// True when Conjur answered 403 (access revoked) or 404 (variable deleted)
    ///
    /// Transport and parse failures never count, whatever their message says.
    #[must_use]
    pub fn is_revoked_access(&self) -> bool {
        matches!(self, Self::Status { status: 403 | 404 })
    }
}

/// Batch retrieval of Conjur variables
#[async_trait]
pub trait SecretRetriever: Send + Sync + fmt::Debug {
    /// Retrieve the values of `paths`
    ///
    /// An empty `paths` returns an empty map without contacting Conjur.
    /// The returned map is keyed by the requested paths.
    async fn retrieve_secrets(&self, paths: &[String]) -> Result<SecretValues, RetrieveError>;
}

#[async_trait]
impl<T: SecretRetriever + ?Sized> SecretRetriever for Arc<T> {
    async fn retrieve_secrets(&self, paths: &[String]) -> Result<SecretValues, RetrieveError> {
        (**self).retrieve_secrets(paths).await
    }
}

/// Umbrella error for one provide pass
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to fetch secrets from Conjur: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to provide secrets for {} group(s): {}", .0.len(), join_errors(.0))]
    Groups(Vec<GroupError>),
    #[error("failed to provide secrets to Kubernetes Secrets: {}", join_errors(.0))]
    K8s(Vec<K8sError>),
    #[error(transparent)]
    Status(#[from] StatusError),
}

impl From<K8sError> for ProviderError {
    fn from(err: K8sError) -> Self {
        Self::K8s(vec![err])
    }
}

fn join_errors<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of one provide pass
///
/// A pass can both change destinations and fail, for example when
/// sanitization removed files before the fetch error is reported.
#[derive(Debug, Default)]
pub struct ProvideOutcome {
    pub updated: bool,
    pub error: Option<ProviderError>,
}

impl ProvideOutcome {
    #[must_use]
    pub fn success(updated: bool) -> Self {
        Self {
            updated,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(updated: bool, error: impl Into<ProviderError>) -> Self {
        Self {
            updated,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`, dropping the `updated` flag on failure
    pub fn into_result(self) -> Result<bool, ProviderError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.updated),
        }
    }
}

/// One fetch-render-deliver pass for a destination type
#[async_trait]
pub trait SecretsProvider: Send {
    async fn provide(&mut self) -> ProvideOutcome;
}

#[async_trait]
impl<P: SecretsProvider + ?Sized> SecretsProvider for Box<P> {
    async fn provide(&mut self) -> ProvideOutcome {
        (**self).provide().await
    }
}

/// Errors constructing a provider from configuration
#[derive(Error, Debug)]
pub enum ProviderSetupError {
    #[error("invalid secret group configuration: {}", join_errors(.0))]
    SecretGroups(Vec<SecretGroupError>),
    #[error("Kubernetes Secrets destination requires a Kubernetes client")]
    MissingK8sClient,
}

/// Build the provider for the configured destination
pub fn new_provider_for_type(
    config: &ProviderConfig,
    annotations: &HashMap<String, String>,
    retriever: Arc<dyn SecretRetriever>,
    k8s_client: Option<Arc<dyn K8sSecretsClient>>,
) -> Result<Box<dyn SecretsProvider>, ProviderSetupError> {
    match config.store_type {
        StoreType::File => {
            let provider = FileProvider::from_annotations(
                retriever,
                config.sanitize_enabled,
                &config.secrets_base_path,
                &config.templates_base_path,
                annotations,
            )
            .map_err(ProviderSetupError::SecretGroups)?;
            Ok(Box::new(provider))
        }
        StoreType::K8sSecrets => {
            let client = k8s_client.ok_or(ProviderSetupError::MissingK8sClient)?;
            Ok(Box::new(K8sProvider::new(
                retriever,
                client,
                config.sanitize_enabled,
                config.pod_namespace.clone(),
                config.required_k8s_secrets.clone(),
            )))
        }
    }
}
