//! # Secret Fetching
//!
//! Collects the distinct variable paths referenced by every group, retrieves
//! them in a single batch and hands each group its secrets in spec order.
//! Rendered files are text, so values must be valid UTF-8.

use super::secret_group::SecretGroup;
use crate::provider::{RetrieveError, SecretRetriever};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// A resolved secret
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub alias: String,
    pub value: Zeroizing<String>,
}

impl Secret {
    pub fn new(alias: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            value: Zeroizing::new(value.into()),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("alias", &self.alias)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error("secret with alias {alias:?} not present in fetched secrets")]
    MissingSecret { alias: String },
    #[error("secret with alias {alias:?} is not valid UTF-8")]
    InvalidUtf8 { alias: String },
}

impl FetchError {
    #[must_use]
    pub fn is_revoked_access(&self) -> bool {
        match self {
            Self::Retrieve(err) => err.is_revoked_access(),
            Self::MissingSecret { .. } | Self::InvalidUtf8 { .. } => false,
        }
    }
}

/// Secrets per group name
pub type SecretsByGroup = HashMap<String, Vec<Secret>>;

/// Distinct variable paths referenced by `groups`, in sorted order
#[must_use]
pub fn all_paths(groups: &[SecretGroup]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| group.specs.iter().map(|spec| spec.path.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fetch every group's secrets with one batch retrieval
pub async fn fetch_secrets_for_groups(
    retriever: &dyn SecretRetriever,
    groups: &[SecretGroup],
) -> Result<SecretsByGroup, FetchError> {
    let paths = all_paths(groups);
    debug!(count = paths.len(), "Retrieving Conjur variables for secret groups");
    let values = retriever.retrieve_secrets(&paths).await?;

    let mut by_group = SecretsByGroup::new();
    for group in groups {
        let mut secrets = Vec::with_capacity(group.specs.len());
        for spec in &group.specs {
            let value = values
                .get(&spec.path)
                .ok_or_else(|| FetchError::MissingSecret {
                    alias: spec.alias.clone(),
                })?;
            let value = std::str::from_utf8(value)
                .ok()
                .ok_or_else(|| FetchError::InvalidUtf8 {
                    alias: spec.alias.clone(),
                })?;
            secrets.push(Secret {
                alias: spec.alias.clone(),
                value: Zeroizing::new(value.to_string()),
            });
        }
        by_group.insert(group.name.clone(), secrets);
    }
    Ok(by_group)
}
