//! Engine error type.

use sync_core::CycleError;
use sync_types::{ErrorKind, Guid, ItemError, TypesError};
use thiserror::Error;

/// Errors produced by the sync engine and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Malformed input, such as a remote entity without guid or name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The local store failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Hierarchical ordering failed.
    #[error("cycle detected in parent/child relation: {}", .chain.join(" -> "))]
    CycleDetected {
        /// Ids on the cycle.
        chain: Vec<String>,
    },

    /// The owner of an in-flight operation went away.
    #[error("operation canceled")]
    OperationCanceled,

    /// Full data of an entity could not be downloaded.
    #[error("download of {guid} failed: {message}")]
    Download {
        /// Guid of the entity.
        guid: Guid,
        /// What went wrong.
        message: String,
        /// The remote refused because of its rate limit.
        rate_limited: bool,
    },

    /// The remote service failed.
    #[error("remote service error: {0}")]
    Remote(String),

    /// The settings store failed.
    #[error("settings error: {0}")]
    Settings(String),
}

impl SyncError {
    /// Classification used in persisted failure records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SyncError::Storage(_) | SyncError::Settings(_) => ErrorKind::StorageFailure,
            SyncError::CycleDetected { .. } => ErrorKind::CycleDetected,
            SyncError::OperationCanceled => ErrorKind::OperationCanceled,
            SyncError::Download { .. } => ErrorKind::DownloadFailed,
            SyncError::Remote(_) => ErrorKind::RemoteFailure,
        }
    }

    /// Whether this is a rate-limited download failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::Download { rate_limited: true, .. })
    }

    /// Whether a remote call may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(_))
    }

    /// Persistable record of this error.
    pub fn to_item_error(&self) -> ItemError {
        ItemError::new(self.kind(), self.to_string())
    }
}

impl From<CycleError> for SyncError {
    fn from(err: CycleError) -> Self {
        SyncError::CycleDetected { chain: err.chain }
    }
}

impl From<TypesError> for SyncError {
    fn from(err: TypesError) -> Self {
        SyncError::InvalidArgument(err.to_string())
    }
}

/// Result alias used across the engine.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_taxonomy() {
        assert_eq!(
            SyncError::InvalidArgument("x".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(SyncError::Storage("x".into()).kind(), ErrorKind::StorageFailure);
        assert_eq!(SyncError::OperationCanceled.kind(), ErrorKind::OperationCanceled);
        assert_eq!(
            SyncError::from(CycleError {
                chain: vec!["a".into(), "b".into()]
            })
            .kind(),
            ErrorKind::CycleDetected
        );
    }

    #[test]
    fn rate_limit_flag() {
        let err = SyncError::Download {
            guid: Guid::new("n1"),
            message: "slow down".into(),
            rate_limited: true,
        };
        assert!(err.is_rate_limited());
        assert!(!SyncError::Remote("x".into()).is_rate_limited());
    }

    #[test]
    fn only_remote_errors_are_transient() {
        assert!(SyncError::Remote("timeout".into()).is_transient());
        assert!(!SyncError::Storage("x".into()).is_transient());
        assert!(!SyncError::InvalidArgument("x".into()).is_transient());
    }

    #[test]
    fn item_error_carries_message() {
        let item = SyncError::Storage("disk full".into()).to_item_error();
        assert_eq!(item.kind, ErrorKind::StorageFailure);
        assert!(item.message.contains("disk full"));
    }
}
