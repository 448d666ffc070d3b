//! # Provider Status
//!
//! Records lifecycle status for readiness/liveness probes by creating empty
//! sentinel files, and copies the probe scripts into the shared status volume.

use crate::constants::{
    DEFAULT_SCRIPTS_SOURCE_DIR, DEFAULT_STATUS_DIR, SECRETS_PROVIDED_FILE, SECRETS_UPDATED_FILE,
    STATUS_FILE_MODE, STATUS_SCRIPTS, STATUS_SCRIPT_MODE,
};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("unable to mkdir at {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("unable to create status file {path}: {source}")]
    StatusFile { path: PathBuf, source: io::Error },
    #[error("unable to copy script {from} to {to}: {source}")]
    CopyScript {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("unable to set permissions on {path}: {source}")]
    Chmod { path: PathBuf, source: io::Error },
}

/// Records provider status for external probes
pub trait StatusUpdater: Send + Sync + fmt::Debug {
    /// Record that the first provide completed
    fn set_secrets_provided(&self) -> Result<(), StatusError>;

    /// Record that a refresh changed at least one destination
    fn set_secrets_updated(&self) -> Result<(), StatusError>;

    /// Copy probe scripts into the shared status directory
    fn copy_scripts(&self) -> Result<(), StatusError>;
}

/// [`StatusUpdater`] backed by sentinel files
#[derive(Debug, Clone)]
pub struct FileStatusUpdater {
    provided_file: PathBuf,
    updated_file: PathBuf,
    scripts: Vec<String>,
    script_src_dir: PathBuf,
    script_dest_dir: PathBuf,
}

impl Default for FileStatusUpdater {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_DIR, DEFAULT_SCRIPTS_SOURCE_DIR)
    }
}

impl FileStatusUpdater {
    /// Status files and scripts live in `status_dir`; scripts are copied from `scripts_src_dir`
    pub fn new(status_dir: impl AsRef<Path>, scripts_src_dir: impl AsRef<Path>) -> Self {
        let status_dir = status_dir.as_ref();
        Self {
            provided_file: status_dir.join(SECRETS_PROVIDED_FILE),
            updated_file: status_dir.join(SECRETS_UPDATED_FILE),
            scripts: STATUS_SCRIPTS.iter().map(ToString::to_string).collect(),
            script_src_dir: scripts_src_dir.as_ref().to_path_buf(),
            script_dest_dir: status_dir.to_path_buf(),
        }
    }

    fn set_status(path: &Path) -> Result<(), StatusError> {
        File::create(path).map_err(|source| StatusError::StatusFile {
            path: path.to_path_buf(),
            source,
        })?;
        chmod(path, STATUS_FILE_MODE)
    }
}

fn chmod(path: &Path, mode: u32) -> Result<(), StatusError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        StatusError::Chmod {
            path: path.to_path_buf(),
            source,
        }
    })
}

impl StatusUpdater for FileStatusUpdater {
    fn set_secrets_provided(&self) -> Result<(), StatusError> {
        Self::set_status(&self.provided_file)
    }

    fn set_secrets_updated(&self) -> Result<(), StatusError> {
        Self::set_status(&self.updated_file)
    }

    fn copy_scripts(&self) -> Result<(), StatusError> {
        fs::create_dir_all(&self.script_dest_dir).map_err(|source| StatusError::CreateDir {
            path: self.script_dest_dir.clone(),
            source,
        })?;

        for script in &self.scripts {
            let from = self.script_src_dir.join(script);
            let to = self.script_dest_dir.join(script);
            fs::copy(&from, &to).map_err(|source| StatusError::CopyScript {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;
            chmod(&to, STATUS_SCRIPT_MODE)?;
            debug!(script = %to.display(), "Copied status script");
        }
        Ok(())
    }
}
