//! Error types for scanning operations.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when setting up or starting a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The worker pool or coordinator thread could not be created.
    #[error("Failed to start scan threads: {message}")]
    ThreadPool { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Path the error refers to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::PermissionDenied { path }
            | Self::NotFound { path }
            | Self::Io { path, .. }
            | Self::NotADirectory { path } => Some(path),
            Self::ThreadPool { .. } => None,
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// The scan root does not exist or is not a directory. Fatal.
    InvalidPath,
    /// Permission was denied listing a directory.
    PermissionDenied,
    /// Error reading a directory.
    ReadError,
    /// Error reading an entry's metadata.
    MetadataError,
    /// A directory task panicked; its subtree is incomplete.
    TaskPanicked,
}

/// Error reported through the event stream.
///
/// Everything except [`WarningKind::InvalidPath`] is recoverable: the affected
/// subtree is left incomplete and the scan carries on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a permission denied warning.
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let message = format!("Permission denied: {}", path.display());
        Self::new(path, message, WarningKind::PermissionDenied)
    }

    /// Create a read error warning.
    pub fn read_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::permission_denied(path);
        }
        let message = format!("Cannot read {}: {error}", path.display());
        Self::new(path, message, WarningKind::ReadError)
    }

    /// Create a metadata error warning.
    pub fn metadata_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        let message = format!("Cannot stat {}: {error}", path.display());
        Self::new(path, message, WarningKind::MetadataError)
    }

    /// Create a warning for a directory task that panicked.
    pub fn task_panicked(path: impl Into<PathBuf>, reason: &str) -> Self {
        let path = path.into();
        let message = format!("Scan of {} aborted: {reason}", path.display());
        Self::new(path, message, WarningKind::TaskPanicked)
    }

    /// Create the fatal warning for a rejected scan root.
    pub fn invalid_path(path: impl Into<PathBuf>, error: &ScanError) -> Self {
        Self::new(path, error.to_string(), WarningKind::InvalidPath)
    }

    /// Convert a directory listing failure into a warning.
    pub fn from_scan_error(error: &ScanError) -> Self {
        let path = error.path().cloned().unwrap_or_default();
        let kind = match error {
            ScanError::PermissionDenied { .. } => WarningKind::PermissionDenied,
            _ => WarningKind::ReadError,
        };
        Self::new(path, error.to_string(), kind)
    }

    /// Whether this warning ends the scan before it starts.
    pub fn is_fatal(&self) -> bool {
        self.kind == WarningKind::InvalidPath
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
