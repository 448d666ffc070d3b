//! # Atomic Writer
//!
//! Crash-safe single-destination file writer.
//!
//! Content is written to a temporary file in the destination's own directory
//! and renamed over the destination on [`AtomicWriter::close`]. Readers of the
//! destination only ever see the previous or the new complete content.
//!
//! When a write fails, the temporary file is removed. If it cannot be removed
//! it is truncated to zero bytes so no secret content stays on disk.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Filesystem operations used by [`AtomicWriter`]
///
/// The real implementation is [`StdFileSystem`]; tests substitute doubles to
/// inject failures at each step.
pub trait FileSystem: fmt::Debug {
    type File: Write;

    /// Create a new uniquely named file in `dir` whose name starts with `prefix`
    fn create_temp(&self, dir: &Path, prefix: &str) -> io::Result<(Self::File, PathBuf)>;

    /// Flush file content to stable storage
    fn sync(&self, file: &mut Self::File) -> io::Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Truncate a file to zero bytes
    fn truncate(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystem`] backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    type File = File;

    fn create_temp(&self, dir: &Path, prefix: &str) -> io::Result<(File, PathBuf)> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)
    }

    fn sync(&self, file: &mut File) -> io::Result<()> {
        file.sync_all()
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn truncate(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.set_len(0)
    }
}

/// Writer that replaces `path` atomically on close
///
/// Dropping the writer without closing it discards everything written.
pub struct AtomicWriter<F: FileSystem = StdFileSystem> {
    fs: F,
    path: PathBuf,
    permissions: u32,
    temp_file: Option<F::File>,
    temp_path: Option<PathBuf>,
    closed: bool,
}

impl<F: FileSystem> fmt::Debug for AtomicWriter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("path", &self.path)
            .field("permissions", &format_args!("{:o}", self.permissions))
            .field("temp_path", &self.temp_path)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl AtomicWriter<StdFileSystem> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, permissions: u32) -> Self {
        Self::with_file_system(StdFileSystem, path, permissions)
    }
}

impl<F: FileSystem> AtomicWriter<F> {
    pub fn with_file_system(fs: F, path: impl Into<PathBuf>, permissions: u32) -> Self {
        Self {
            fs,
            path: path.into(),
            permissions,
            temp_file: None,
            temp_path: None,
            closed: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_temp_file(&mut self) -> io::Result<()> {
        if self.temp_file.is_some() {
            return Ok(());
        }

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map_or_else(|| "secrets".into(), |n| n.to_string_lossy())
        );

        let (file, temp_path) = self.fs.create_temp(dir, &prefix).inspect_err(|e| {
            error!(path = %self.path.display(), error = %e, "Unable to create temporary file");
        })?;
        self.temp_file = Some(file);
        self.temp_path = Some(temp_path);
        Ok(())
    }

    /// Sync, chmod and rename the temporary file over the destination
    ///
    /// Closing a writer that saw no writes replaces the destination with an
    /// empty file. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.ensure_temp_file().and_then(|()| self.commit());
        self.cleanup();
        result
    }

    fn commit(&mut self) -> io::Result<()> {
        let (Some(mut file), Some(temp_path)) = (self.temp_file.take(), self.temp_path.clone())
        else {
            return Ok(());
        };

        if let Err(e) = self.fs.sync(&mut file) {
            error!(path = %temp_path.display(), error = %e, "Unable to flush temporary file");
            return Err(e);
        }
        drop(file);

        if let Err(e) = self.fs.chmod(&temp_path, self.permissions) {
            // Still rename; the destination keeps the temp file's default mode
            warn!(path = %temp_path.display(), error = %e, "Unable to set permissions on temporary file");
        }

        if let Err(e) = self.fs.rename(&temp_path, &self.path) {
            error!(
                from = %temp_path.display(),
                to = %self.path.display(),
                error = %e,
                "Unable to rename temporary file"
            );
            return Err(e);
        }

        self.temp_path = None;
        debug!(path = %self.path.display(), "Atomically replaced file");
        Ok(())
    }

    /// Remove the temporary file, or truncate it if removal fails
    ///
    /// Called automatically on failure, after close and on drop.
    pub fn cleanup(&mut self) {
        self.temp_file = None;
        let Some(temp_path) = self.temp_path.take() else {
            return;
        };

        match self.fs.remove(&temp_path) {
            Ok(()) => return,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(_) => {}
        }

        match self.fs.truncate(&temp_path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(
                    path = %temp_path.display(),
                    destination = %self.path.display(),
                    error = %e,
                    "Unable to remove or truncate temporary file, secret content may be left on disk"
                );
                self.temp_path = Some(temp_path);
            }
            Ok(()) => {
                error!(
                    path = %temp_path.display(),
                    destination = %self.path.display(),
                    "Unable to remove temporary file, truncated it instead"
                );
                self.temp_path = Some(temp_path);
            }
        }
    }
}

impl<F: FileSystem> Write for AtomicWriter<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("write to closed atomic writer"));
        }
        self.ensure_temp_file()?;

        let result = match self.temp_file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("temporary file not open")),
        };
        if let Err(e) = &result {
            error!(path = %self.path.display(), error = %e, "Unable to write temporary file");
            self.cleanup();
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp_file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<F: FileSystem> Drop for AtomicWriter<F> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Open an atomic writer for `path`, creating parent directories first
///
/// The destination itself is created (empty, if absent) so that permission
/// problems surface here instead of at close.
pub fn open_atomic_writer(path: &Path, permissions: u32) -> io::Result<AtomicWriter> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("unable to create directory for {}: {e}", path.display()),
            )
        })?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(permissions)
        .open(path)
        .map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("unable to open file to write at {}: {e}", path.display()),
            )
        })?;

    Ok(AtomicWriter::new(path, permissions))
}
