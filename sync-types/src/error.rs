//! Error types shared across notesync crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or parsing data-model values.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A string could not be parsed as an identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An entity is missing a field its operation requires.
    #[error("missing field {field} on {entity}")]
    MissingField {
        /// Entity description.
        entity: String,
        /// Name of the missing field.
        field: &'static str,
    },
}

/// Classification of a failure, stable across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input; never retried.
    InvalidArgument,
    /// The local storage collaborator failed.
    StorageFailure,
    /// Hierarchical ordering failed.
    CycleDetected,
    /// The owning component went away mid-flight.
    OperationCanceled,
    /// Fetching full entity content failed.
    DownloadFailed,
    /// The remote service rejected a request.
    RemoteFailure,
}

impl ErrorKind {
    /// Stable textual form used in persisted ledgers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::CycleDetected => "cycle_detected",
            ErrorKind::OperationCanceled => "operation_canceled",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::RemoteFailure => "remote_failure",
        }
    }

    /// Inverse of [`ErrorKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid_argument" => Some(ErrorKind::InvalidArgument),
            "storage_failure" => Some(ErrorKind::StorageFailure),
            "cycle_detected" => Some(ErrorKind::CycleDetected),
            "operation_canceled" => Some(ErrorKind::OperationCanceled),
            "download_failed" => Some(ErrorKind::DownloadFailed),
            "remote_failure" => Some(ErrorKind::RemoteFailure),
            _ => None,
        }
    }
}

/// A per-item failure as recorded in the processing ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail from the collaborator.
    pub message: String,
}

impl ItemError {
    /// Create a new item error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ItemError {}
