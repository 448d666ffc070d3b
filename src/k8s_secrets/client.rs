//! # Kubernetes Secrets Client
//!
//! Get and update access to the Kubernetes Secrets the provider manages.

use super::provider::K8sError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// New data entries for one Kubernetes Secret, keyed by data key
pub type SecretData = BTreeMap<String, Zeroizing<Vec<u8>>>;

#[async_trait]
pub trait K8sSecretsClient: Send + Sync + fmt::Debug {
    async fn retrieve_secret(&self, namespace: &str, name: &str) -> Result<Secret, K8sError>;

    /// Merge `new_data` into `original` and write the result back
    ///
    /// Data keys not named in `new_data` keep their original values.
    async fn update_secret(
        &self,
        namespace: &str,
        name: &str,
        original: &Secret,
        new_data: &SecretData,
    ) -> Result<(), K8sError>;
}

/// [`K8sSecretsClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretsClient {
    client: Client,
}

impl fmt::Debug for KubeSecretsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSecretsClient").finish_non_exhaustive()
    }
}

impl KubeSecretsClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `original` with `new_data` merged into its data entries
#[must_use]
pub fn merge_secret_data(original: &Secret, new_data: &SecretData) -> Secret {
    let mut secret = original.clone();
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    for (key, value) in new_data {
        data.insert(key.clone(), ByteString(value.to_vec()));
    }
    secret
}

#[async_trait]
impl K8sSecretsClient for KubeSecretsClient {
    async fn retrieve_secret(&self, namespace: &str, name: &str) -> Result<Secret, K8sError> {
        info!(namespace, name, "Retrieving Kubernetes Secret");
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets.get(name).await.map_err(|e| {
            // API errors may echo object content, keep them out of the error chain
            debug!(namespace, name, error = %e, "Kubernetes API rejected Secret retrieval");
            K8sError::Retrieve {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        })
    }

    async fn update_secret(
        &self,
        namespace: &str,
        name: &str,
        original: &Secret,
        new_data: &SecretData,
    ) -> Result<(), K8sError> {
        info!(namespace, name, keys = new_data.len(), "Updating Kubernetes Secret");
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = merge_secret_data(original, new_data);
        secrets
            .replace(name, &PostParams::default(), &secret)
            .await
            .map(|_| ())
            .map_err(|e| {
                debug!(namespace, name, error = %e, "Kubernetes API rejected Secret update");
                K8sError::Update {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            })
    }
}
