use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure category, for callers that branch on the kind of failure
/// (e.g. retry with a fresh root after `Reconciliation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPath,
    MissingSource,
    PathConflict,
    Projection,
    Provision,
    Collection,
    Reconciliation,
}

#[derive(Error, Debug)]
pub enum ExecRootError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Input source does not exist: {}", .source_path.display())]
    MissingSource { source_path: PathBuf },

    #[error("Path conflict at {}: {reason}", .path.display())]
    PathConflict { path: PathBuf, reason: String },

    #[error("Failed to project {}: {source}", .path.display())]
    Projection {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to provision {}: {source}", .path.display())]
    Provision {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to collect {}: {source}", .path.display())]
    Collection {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to reconcile {}: {reason}", .path.display())]
    Reconciliation { path: PathBuf, reason: String },
}

impl ExecRootError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::MissingSource { .. } => ErrorKind::MissingSource,
            Self::PathConflict { .. } => ErrorKind::PathConflict,
            Self::Projection { .. } => ErrorKind::Projection,
            Self::Provision { .. } => ErrorKind::Provision,
            Self::Collection { .. } => ErrorKind::Collection,
            Self::Reconciliation { .. } => ErrorKind::Reconciliation,
        }
    }

    pub(crate) fn projection(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Projection {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn provision(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Provision {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn collection(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Collection {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn conflict(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn reconciliation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Reconciliation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
