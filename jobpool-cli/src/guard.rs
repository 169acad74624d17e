//! Run Guard
//!
//! A file in the project root whose presence means "a batch is running".
//! It is created exclusively when a batch starts and removed when the batch
//! ends. Deleting it from outside is how a running batch is cancelled.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Guard file name used when nothing else is configured
pub const DEFAULT_GUARD_FILE: &str = ".jobpool.guard";

/// Errors raised while creating or removing the guard
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("guard file {} already exists", path.display())]
    Exists { path: PathBuf },

    #[error("guard file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the guard file says about the batch that created it
#[derive(Debug, Clone, PartialEq)]
pub struct GuardInfo {
    /// Process id of the submitting process
    pub pid: Option<u32>,
    /// When the batch started
    pub started: Option<DateTime<Utc>>,
}

impl GuardInfo {
    fn parse(content: &str) -> Self {
        let mut info = GuardInfo {
            pid: None,
            started: None,
        };
        for line in content.lines() {
            match line.split_once('=') {
                Some(("pid", v)) => info.pid = v.trim().parse().ok(),
                Some(("started", v)) => {
                    info.started = DateTime::parse_from_rfc3339(v.trim())
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                }
                _ => {}
            }
        }
        info
    }
}

/// Which file on disk a guard created. A file recreated at the same path by
/// someone else has another inode or another stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
    /// Contents written at acquire time; `None` if that write failed
    stamp: Option<String>,
}

/// Held guard file. Removed on drop unless [`RunGuard::disarm`] was called.
///
/// The guard only ever reports on, and removes, the file it created itself.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
    identity: FileIdentity,
    armed: bool,
}

impl RunGuard {
    /// Create the guard file; fails with [`GuardError::Exists`] if another
    /// batch holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, GuardError> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(GuardError::Exists { path });
            }
            Err(source) => return Err(GuardError::Io { path, source }),
        };

        let stamp = format!(
            "pid={}\nstarted={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        // The guard's presence is what matters; a failed write is not fatal.
        let stamp = match file.write_all(stamp.as_bytes()) {
            Ok(()) => Some(stamp),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write guard details");
                None
            }
        };
        let meta = match file.metadata() {
            Ok(meta) => meta,
            Err(source) => {
                let _ = std::fs::remove_file(&path);
                return Err(GuardError::Io { path, source });
            }
        };

        tracing::debug!(path = %path.display(), ino = meta.ino(), "run guard acquired");
        Ok(Self {
            path,
            identity: FileIdentity {
                dev: meta.dev(),
                ino: meta.ino(),
                stamp,
            },
            armed: true,
        })
    }

    /// Whether the file this guard created is still in place.
    ///
    /// False once it was removed, even if another batch has since created a
    /// new guard at the same path.
    pub fn exists(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return false;
        };
        if meta.dev() != self.identity.dev || meta.ino() != self.identity.ino {
            return false;
        }
        // Inode numbers get reused, so the stamp has to match too
        match &self.identity.stamp {
            Some(stamp) => std::fs::read_to_string(&self.path).is_ok_and(|c| &c == stamp),
            None => true,
        }
    }

    /// Path of the guard file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the guard file now. A file that replaced ours is left alone.
    pub fn release(mut self) -> Result<(), GuardError> {
        self.armed = false;
        self.remove_own().map(|_| ())
    }

    fn remove_own(&self) -> Result<bool, GuardError> {
        if !self.exists() {
            if self.path.exists() {
                tracing::warn!(
                    path = %self.path.display(),
                    "run guard was replaced by another batch; leaving it in place"
                );
            }
            return Ok(false);
        }
        remove(&self.path)
    }

    /// Give up ownership without touching the file. Used after an abort,
    /// when the file is already gone and may have been recreated by
    /// another batch.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.remove_own() {
                tracing::warn!(error = %e, "failed to remove run guard");
            }
        }
    }
}

/// Remove a guard file. Returns whether a file was removed.
pub fn remove(path: &Path) -> Result<bool, GuardError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(GuardError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read the guard file, if a batch is running
pub fn inspect(path: &Path) -> Option<GuardInfo> {
    std::fs::read_to_string(path)
        .ok()
        .map(|content| GuardInfo::parse(&content))
}
