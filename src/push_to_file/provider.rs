//! # File Provider
//!
//! Push-to-file destination: fetch all group secrets in one batch, render
//! each group and atomically write its file when the content changed.
//!
//! One failing group does not stop the others. When Conjur reports revoked
//! access (403) or a deleted variable (404) and sanitization is enabled,
//! every group's file is removed.

use super::fetch::{fetch_secrets_for_groups, Secret};
use super::renderer::RenderError;
use super::secret_group::{new_secret_groups, SecretGroup, SecretGroupError};
use crate::controller::atomic_writer::open_atomic_writer;
use crate::controller::checksum::{Checksum, ChecksumStore};
use crate::provider::{ProvideOutcome, ProviderError, SecretRetriever, SecretsProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

/// Failure delivering one group
#[derive(Error, Debug)]
pub enum GroupError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to write secret file for group {group:?} at {path}: {source}")]
    Write {
        group: String,
        path: PathBuf,
        source: io::Error,
    },
}

/// Push-to-file [`SecretsProvider`]
pub struct FileProvider {
    retriever: Arc<dyn SecretRetriever>,
    groups: Vec<SecretGroup>,
    sanitize_enabled: bool,
    checksums: ChecksumStore,
}

impl fmt::Debug for FileProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileProvider")
            .field("groups", &self.groups.iter().map(|g| &g.name).collect::<Vec<_>>())
            .field("sanitize_enabled", &self.sanitize_enabled)
            .finish_non_exhaustive()
    }
}

impl FileProvider {
    #[must_use]
    pub fn new(
        retriever: Arc<dyn SecretRetriever>,
        groups: Vec<SecretGroup>,
        sanitize_enabled: bool,
    ) -> Self {
        Self {
            retriever,
            groups,
            sanitize_enabled,
            checksums: ChecksumStore::new(),
        }
    }

    /// Build groups from annotations and wrap them in a provider
    pub fn from_annotations(
        retriever: Arc<dyn SecretRetriever>,
        sanitize_enabled: bool,
        secrets_base_path: &Path,
        templates_base_path: &Path,
        annotations: &HashMap<String, String>,
    ) -> Result<Self, Vec<SecretGroupError>> {
        let groups = new_secret_groups(secrets_base_path, templates_base_path, annotations)?;
        Ok(Self::new(retriever, groups, sanitize_enabled))
    }

    #[must_use]
    pub fn groups(&self) -> &[SecretGroup] {
        &self.groups
    }

    /// Delete every group's file; files already gone are fine
    fn remove_secret_files(&mut self) {
        for group in &self.groups {
            info!(
                group = %group.name,
                path = %group.file_path.display(),
                "Removing secret file after Conjur denied access or reported a missing variable"
            );
            match std::fs::remove_file(&group.file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!(
                    group = %group.name,
                    path = %group.file_path.display(),
                    error = %e,
                    "Failed to remove secret file"
                ),
            }
            // Next successful fetch must rewrite the file even if values are unchanged
            self.checksums.forget(&group.name);
        }
    }
}

/// Render and write one group; `Ok(false)` when the content is unchanged
fn push_group(
    group: &SecretGroup,
    secrets: &[Secret],
    checksums: &mut ChecksumStore,
) -> Result<bool, GroupError> {
    let content = group.render(secrets)?;

    let checksum = Checksum::of(content.as_bytes());
    if !checksums.changed(&group.name, &checksum) {
        info!(group = %group.name, "Secret file content unchanged, skipping write");
        return Ok(false);
    }

    let write_error = |source| GroupError::Write {
        group: group.name.clone(),
        path: group.file_path.clone(),
        source,
    };
    let mut writer =
        open_atomic_writer(&group.file_path, group.file_permissions).map_err(write_error)?;
    writer.write_all(content.as_bytes()).map_err(write_error)?;
    writer.close().map_err(write_error)?;

    checksums.record(&group.name, checksum);
    debug!(group = %group.name, path = %group.file_path.display(), "Wrote secret file");
    Ok(true)
}

#[async_trait]
impl SecretsProvider for FileProvider {
    async fn provide(&mut self) -> ProvideOutcome {
        let span = info_span!("secrets.push_to_file", groups.count = self.groups.len());

        async move {
            let secrets_by_group =
                match fetch_secrets_for_groups(self.retriever.as_ref(), &self.groups).await {
                    Ok(secrets) => secrets,
                    Err(err) => {
                        let sanitize = self.sanitize_enabled && err.is_revoked_access();
                        if sanitize {
                            self.remove_secret_files();
                        }
                        error!(error = %err, "Failed to fetch secrets for secret groups");
                        return ProvideOutcome::failure(sanitize, err);
                    }
                };

            let mut updated = false;
            let mut errors = Vec::new();
            for group in &self.groups {
                let secrets = secrets_by_group
                    .get(&group.name)
                    .map_or(&[][..], Vec::as_slice);
                match push_group(group, secrets, &mut self.checksums) {
                    Ok(written) => updated |= written,
                    Err(err) => {
                        error!(group = %group.name, error = %err, "Failed to provide secrets for group");
                        errors.push(err);
                    }
                }
            }

            if errors.is_empty() {
                info!(updated, "Provided secrets to files");
                ProvideOutcome::success(updated)
            } else {
                ProvideOutcome::failure(updated, ProviderError::Groups(errors))
            }
        }
        .instrument(span)
        .await
    }
}
