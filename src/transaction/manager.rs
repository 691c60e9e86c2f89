//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Loading and holding the state of every repository
//! - Transaction creation and lifecycle
//! - Tracking active transactions
//!
//! Each repository's state sits behind its own lock, so transactions on
//! different repositories run in parallel while transactions on the same
//! repository are serialized. Publishing to `main` is serialized by the
//! store itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use ulid::Ulid;

use crate::catalog::{RepositoryId, RepositoryState};
use crate::storage::{CommitId, GitRepository};
use crate::transaction::context::{ActiveMap, Transaction, TransactionMetadata, TxActive};
use crate::transaction::error::{TransactionError, TransactionResult};

type SharedState = Arc<RwLock<RepositoryState>>;

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    /// The underlying store.
    store: GitRepository,
    /// Loaded repository states by ID.
    repositories: RwLock<HashMap<RepositoryId, SharedState>>,
    /// Active transactions tracked by ID.
    active: ActiveMap,
}

impl TransactionManager {
    /// Create a new transaction manager for the given store.
    pub fn new(store: GitRepository) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                store,
                repositories: RwLock::new(HashMap::new()),
                active: Arc::new(RwLock::new(HashMap::new())),
            }),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &GitRepository {
        &self.inner.store
    }

    /// Start managing a repository's state. Replaces any state already held
    /// for the same repository.
    pub fn install(&self, state: RepositoryState) {
        let id = state.id().clone();
        self.inner
            .repositories
            .write()
            .insert(id, Arc::new(RwLock::new(state)));
    }

    pub fn contains(&self, id: &RepositoryId) -> bool {
        self.inner.repositories.read().contains_key(id)
    }

    pub fn repository_ids(&self) -> Vec<RepositoryId> {
        self.inner.repositories.read().keys().cloned().collect()
    }

    fn shared(&self, id: &RepositoryId) -> TransactionResult<SharedState> {
        self.inner
            .repositories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TransactionError::UnknownRepository(id.clone()))
    }

    /// Run `f` against a consistent view of a repository's state.
    ///
    /// Waits for any transaction on the same repository to finish. Must not
    /// be called while the current thread holds a transaction on `id`.
    pub fn read<F, T>(&self, id: &RepositoryId, f: F) -> TransactionResult<T>
    where
        F: FnOnce(&RepositoryState) -> T,
    {
        let shared = self.shared(id)?;
        let state = shared.read();
        Ok(f(&state))
    }

    /// Begin a new transaction on one repository.
    pub fn begin(
        &self,
        id: &RepositoryId,
        label: impl Into<String>,
    ) -> TransactionResult<Transaction<TxActive>> {
        let shared = self.shared(id)?;

        // Generate unique transaction ID
        let tx_id = Ulid::new().to_string().to_lowercase();
        let metadata = TransactionMetadata {
            tx_id: tx_id.clone(),
            repository_id: id.clone(),
            label: label.into(),
            started_at: Utc::now(),
        };

        let guard = shared.write_arc();

        // Track in active transactions
        self.inner
            .active
            .write()
            .insert(tx_id, metadata.clone());

        Ok(Transaction::new(
            self.inner.store.clone(),
            metadata,
            guard,
            self.inner.active.clone(),
        ))
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Commit a transaction and return the commit that published it.
    pub fn commit_transaction(&self, tx: Transaction<TxActive>) -> TransactionResult<CommitId> {
        let committed = tx.commit()?;
        Ok(committed.final_commit())
    }

    /// Execute a function within a transaction, automatically committing or rolling back.
    ///
    /// If the function returns Ok, the transaction is committed.
    /// If the function returns Err or panics, the transaction is rolled back.
    pub fn with_transaction<F, T, E>(
        &self,
        id: &RepositoryId,
        label: impl Into<String>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let mut tx = self.begin(id, label)?;

        match f(&mut tx) {
            Ok(result) => {
                self.commit_transaction(tx)?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Get current head of main branch.
    pub fn head(&self) -> TransactionResult<CommitId> {
        self.inner.store.head().map_err(TransactionError::from)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("repositories", &self.inner.repositories.read().len())
            .field("active_count", &self.active_count())
            .finish()
    }
}
