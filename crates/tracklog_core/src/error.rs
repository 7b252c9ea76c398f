//! Error types for tracklog core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures of the store itself.
///
/// Conflicts and missing records are *not* errors; they are reported as
/// [`crate::MutationOutcome`] variants.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tracklog_storage::StorageError),

    /// A stored document could not be decoded, or a document could not be encoded.
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A user identifier failed validation.
    #[error("invalid user id: {reason}")]
    InvalidUserId {
        /// Why the identifier was refused.
        reason: String,
    },
}

impl CoreError {
    /// Creates an invalid user id error.
    pub fn invalid_user_id(reason: impl Into<String>) -> Self {
        Self::InvalidUserId {
            reason: reason.into(),
        }
    }
}

/// Reasons a document transform refuses to produce a new document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The record addressed by id does not exist in the document.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// A new record reuses an id that is already taken.
    #[error("duplicate record id: {0}")]
    DuplicateRecord(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::invalid_user_id("empty");
        assert_eq!(err.to_string(), "invalid user id: empty");

        let err = MutationError::RecordNotFound("w-1".into());
        assert!(err.to_string().contains("w-1"));

        let err = MutationError::DuplicateRecord("w-2".into());
        assert_eq!(err.to_string(), "duplicate record id: w-2");
    }

    #[test]
    fn storage_error_converts() {
        let err: CoreError = tracklog_storage::StorageError::Corrupted("bad record".into()).into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
