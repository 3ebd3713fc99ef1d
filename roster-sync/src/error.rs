//! Error types for roster-sync.

use std::path::PathBuf;

use thiserror::Error;

use roster_core::ConfigError;

/// Errors surfaced by directory collaborators.
///
/// `AlreadyMember` is a distinguishable condition rather than an opaque API
/// failure: the action executor upgrades a rejected invite into a role update
/// when it sees it.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory rejected an invitation because the account is already an
    /// organization member.
    #[error("{email} is already a member of the organization")]
    AlreadyMember { email: String },

    /// Any other directory API failure, with the failing operation named.
    #[error("directory error during {operation}: {message}")]
    Api { operation: String, message: String },
}

impl DirectoryError {
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> DirectoryError {
        DirectoryError::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this error means "the account is already a member".
    pub fn is_already_member(&self) -> bool {
        matches!(self, DirectoryError::AlreadyMember { .. })
    }
}

/// Errors surfaced by the mapping store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (store document).
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No record exists for the addressed key.
    #[error("no record for key {key} in organization {organization}")]
    RecordNotFound { organization: String, key: String },

    /// Failure from a non-file store backend.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors that abort an entire sync run.
///
/// Everything downstream of a successful diff degrades instead of aborting;
/// these variants cover the mandatory preconditions.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run is in progress on this engine instance. A caller error,
    /// not a retryable condition.
    #[error("sync already in progress")]
    AlreadyRunning,

    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A mandatory directory listing failed before the diff could run.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
