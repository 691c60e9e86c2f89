//! Ledger error types.

use thiserror::Error;

use crate::catalog::{ContentId, ContentType};
use crate::storage::{InvalidNameError, StorageError};
use crate::transaction::TransactionError;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A complete version was asked to change its content.
    #[error("version {number} of repository '{repository}' is complete and cannot be modified")]
    ImmutableVersion { repository: String, number: u64 },

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("repository '{repository}' already has a version numbered {number}")]
    DuplicateVersionNumber { repository: String, number: u64 },

    #[error("a repository named '{0}' already exists")]
    RepositoryAlreadyExists(String),

    #[error("content not registered: {0}")]
    ContentNotFound(ContentId),

    #[error("content {id} is registered as '{registered}', not '{requested}'")]
    ContentTypeMismatch {
        id: ContentId,
        registered: ContentType,
        requested: ContentType,
    },

    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        name: String,
        reason: InvalidNameError,
    },

    /// Persisting or applying a transaction failed. All of its changes were rolled back.
    #[error("storage transaction failed: {0}")]
    StorageTransaction(#[from] TransactionError),
}

impl LedgerError {
    pub fn invalid_name(name: impl Into<String>, reason: InvalidNameError) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason,
        }
    }

    /// check if this error means the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::RepositoryNotFound(_)
                | LedgerError::VersionNotFound(_)
                | LedgerError::ContentNotFound(_)
        )
    }

    /// check if the caller broke a ledger rule, as opposed to a storage failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::ImmutableVersion { .. }
                | LedgerError::DuplicateVersionNumber { .. }
                | LedgerError::RepositoryAlreadyExists(_)
                | LedgerError::ContentTypeMismatch { .. }
                | LedgerError::InvalidName { .. }
        )
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        LedgerError::StorageTransaction(TransactionError::Storage(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let immutable = LedgerError::ImmutableVersion {
            repository: "acme".to_string(),
            number: 3,
        };
        assert!(immutable.is_contract_violation());
        assert!(!immutable.is_not_found());
        assert_eq!(
            immutable.to_string(),
            "version 3 of repository 'acme' is complete and cannot be modified"
        );

        let missing = LedgerError::VersionNotFound("acme#9".to_string());
        assert!(missing.is_not_found());

        let storage: LedgerError = StorageError::Internal("boom".to_string()).into();
        assert!(matches!(storage, LedgerError::StorageTransaction(_)));
        assert!(storage.to_string().starts_with("storage transaction failed"));
    }
}
