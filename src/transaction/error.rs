//! Transaction error types.

use thiserror::Error;

use crate::catalog::RepositoryId;
use crate::storage::StorageError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error. The in-memory state was restored before this was returned.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No state is loaded for the repository.
    #[error("repository {0} is not loaded")]
    UnknownRepository(RepositoryId),
}
