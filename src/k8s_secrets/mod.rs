//! # Kubernetes Secrets
//!
//! Delivers Conjur secrets into existing Kubernetes Secrets.
//!
//! - `client`: Secret get/update through the Kubernetes API
//! - `provider`: the Kubernetes Secrets [`SecretsProvider`](crate::provider::SecretsProvider)

pub mod client;
pub mod provider;
