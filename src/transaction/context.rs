//! Transaction context using typestate pattern.
//!
//! The typestate pattern ensures at compile time that transactions
//! are used correctly:
//! - Only active transactions can read or mutate repository state
//! - Committed/aborted transactions cannot be reused
//!
//! An active transaction owns the write lock of one repository's state.
//! Every mutation is applied to the state immediately and journaled; commit
//! publishes the touched records as one git commit, and anything short of a
//! successful commit replays the journal backwards.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{RawRwLock, RwLock};
use tracing::{debug, warn};

use crate::catalog::{
    CountRecord, EntryId, LedgerEntry, PendingVersion, RepositoryId, RepositoryRecord,
    RepositoryState, RowRef, VersionId, VersionRecord,
};
use crate::storage::{ChangeSet, CommitId, CommitMessage, GitRepository};
use crate::transaction::error::TransactionResult;

pub(crate) type StateGuard = ArcRwLockWriteGuard<RawRwLock, RepositoryState>;
pub(crate) type ActiveMap = Arc<RwLock<HashMap<String, TransactionMetadata>>>;

/// State of an active transaction: the locked repository and its undo journal.
pub struct TxActive {
    journal: Journal,
}

/// State of a committed transaction.
#[derive(Debug)]
pub struct TxCommitted {
    commit: CommitId,
}

/// State of an aborted transaction.
#[derive(Debug)]
pub struct TxAborted;

/// Transaction metadata stored in the manager.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Repository whose state the transaction holds.
    pub repository_id: RepositoryId,
    /// Short description used in the commit message.
    pub label: String,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

/// A ledger transaction with typestate for lifecycle safety.
///
/// The `State` parameter tracks whether the transaction is:
/// - `TxActive`: Can perform operations
/// - `TxCommitted`: Successfully committed, no more operations allowed
/// - `TxAborted`: Rolled back, no more operations allowed
pub struct Transaction<State> {
    pub(crate) metadata: TransactionMetadata,
    store: GitRepository,
    state: State,
}

impl<State> Transaction<State> {
    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    pub fn repository_id(&self) -> &RepositoryId {
        &self.metadata.repository_id
    }

    pub fn label(&self) -> &str {
        &self.metadata.label
    }
}

enum Undo {
    Repository(RepositoryRecord),
    Version(VersionId, Option<VersionRecord>),
    Entry(EntryId, Option<LedgerEntry>),
    Counts(VersionId, Option<CountRecord>),
    Pending(VersionId, Option<PendingVersion>),
}

struct Journal {
    tx_id: String,
    guard: StateGuard,
    undo: Vec<Undo>,
    dirty: BTreeSet<RowRef>,
    active: ActiveMap,
}

impl Journal {
    fn record(&mut self, undo: Undo, row: RowRef) {
        self.undo.push(undo);
        self.dirty.insert(row);
    }

    /// Restore the state to what it was when the transaction began.
    fn revert(&mut self) {
        let state = &mut *self.guard;
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Repository(previous) => {
                    state.replace_repository(previous);
                }
                Undo::Version(_, Some(previous)) => {
                    state.put_version(previous);
                }
                Undo::Version(id, None) => {
                    state.remove_version(&id);
                }
                Undo::Entry(_, Some(previous)) => {
                    state.put_entry(previous);
                }
                Undo::Entry(id, None) => {
                    state.remove_entry(&id);
                }
                Undo::Counts(_, Some(previous)) => {
                    state.put_counts(previous);
                }
                Undo::Counts(id, None) => {
                    state.remove_counts(&id);
                }
                Undo::Pending(_, Some(previous)) => {
                    state.put_pending(previous);
                }
                Undo::Pending(id, None) => {
                    state.remove_pending(&id);
                }
            }
        }
        self.dirty.clear();
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            warn!(
                tx = %self.tx_id,
                changes = self.undo.len(),
                "transaction dropped without commit, rolling back"
            );
            self.revert();
        }
        self.active.write().remove(&self.tx_id);
    }
}

impl Transaction<TxActive> {
    pub(crate) fn new(
        store: GitRepository,
        metadata: TransactionMetadata,
        guard: StateGuard,
        active: ActiveMap,
    ) -> Self {
        let journal = Journal {
            tx_id: metadata.tx_id.clone(),
            guard,
            undo: Vec::new(),
            dirty: BTreeSet::new(),
            active,
        };
        Self {
            metadata,
            store,
            state: TxActive { journal },
        }
    }

    /// The repository state, including this transaction's own writes.
    pub fn state(&self) -> &RepositoryState {
        &self.state.journal.guard
    }

    /// Number of records this transaction will write.
    pub fn pending_changes(&self) -> usize {
        self.state.journal.dirty.len()
    }

    fn journal(&mut self) -> &mut Journal {
        &mut self.state.journal
    }

    // ==================== Mutations ====================

    pub fn set_repository(&mut self, record: RepositoryRecord) {
        let journal = self.journal();
        let previous = journal.guard.replace_repository(record);
        journal.record(Undo::Repository(previous), RowRef::Repository);
    }

    pub fn put_version(&mut self, record: VersionRecord) {
        let id = record.id.clone();
        let journal = self.journal();
        let previous = journal.guard.put_version(record);
        journal.record(Undo::Version(id.clone(), previous), RowRef::Version(id));
    }

    pub fn remove_version(&mut self, id: &VersionId) -> Option<VersionRecord> {
        let journal = self.journal();
        let previous = journal.guard.remove_version(id)?;
        journal.record(
            Undo::Version(id.clone(), Some(previous.clone())),
            RowRef::Version(id.clone()),
        );
        Some(previous)
    }

    pub fn put_entry(&mut self, entry: LedgerEntry) {
        let id = entry.id.clone();
        let journal = self.journal();
        let previous = journal.guard.put_entry(entry);
        journal.record(Undo::Entry(id.clone(), previous), RowRef::Entry(id));
    }

    pub fn remove_entry(&mut self, id: &EntryId) -> Option<LedgerEntry> {
        let journal = self.journal();
        let previous = journal.guard.remove_entry(id)?;
        journal.record(
            Undo::Entry(id.clone(), Some(previous.clone())),
            RowRef::Entry(id.clone()),
        );
        Some(previous)
    }

    pub fn put_counts(&mut self, record: CountRecord) {
        let id = record.version_id.clone();
        let journal = self.journal();
        let previous = journal.guard.put_counts(record);
        journal.record(Undo::Counts(id.clone(), previous), RowRef::Counts(id));
    }

    pub fn remove_counts(&mut self, version: &VersionId) -> Option<CountRecord> {
        let journal = self.journal();
        let previous = journal.guard.remove_counts(version)?;
        journal.record(
            Undo::Counts(version.clone(), Some(previous.clone())),
            RowRef::Counts(version.clone()),
        );
        Some(previous)
    }

    pub fn put_pending(&mut self, record: PendingVersion) {
        let id = record.version_id.clone();
        let journal = self.journal();
        let previous = journal.guard.put_pending(record);
        journal.record(Undo::Pending(id.clone(), previous), RowRef::Pending(id));
    }

    pub fn remove_pending(&mut self, version: &VersionId) -> Option<PendingVersion> {
        let journal = self.journal();
        let previous = journal.guard.remove_pending(version)?;
        journal.record(
            Undo::Pending(version.clone(), Some(previous.clone())),
            RowRef::Pending(version.clone()),
        );
        Some(previous)
    }

    // ==================== Transaction Control ====================

    /// Publish every touched record as a single commit on `main`.
    ///
    /// If staging or publishing fails the state is rolled back before the
    /// error is returned. A transaction that touched nothing commits nothing.
    pub fn commit(mut self) -> TransactionResult<Transaction<TxCommitted>> {
        let journal = self.journal();
        let mut changes = ChangeSet::new();
        for row in &journal.dirty {
            journal.guard.stage(row, &mut changes)?;
        }

        let message =
            CommitMessage::transaction(&self.metadata.label, &self.metadata.tx_id, changes.len());
        let commit = self.store.apply(&changes, &message)?;

        let journal = self.journal();
        journal.undo.clear();
        journal.dirty.clear();
        debug!(
            tx = %self.metadata.tx_id,
            label = %self.metadata.label,
            records = changes.len(),
            "transaction committed"
        );

        let Transaction { metadata, store, .. } = self;
        Ok(Transaction {
            metadata,
            store,
            state: TxCommitted { commit },
        })
    }

    /// Undo every mutation made by this transaction.
    pub fn rollback(mut self) -> Transaction<TxAborted> {
        let journal = self.journal();
        if !journal.undo.is_empty() {
            debug!(
                tx = %journal.tx_id,
                changes = journal.undo.len(),
                "rolling back transaction"
            );
        }
        journal.revert();

        let Transaction { metadata, store, .. } = self;
        Transaction {
            metadata,
            store,
            state: TxAborted,
        }
    }
}

impl Transaction<TxCommitted> {
    /// Get the commit that published this transaction.
    pub fn final_commit(&self) -> CommitId {
        self.state.commit
    }
}

impl Transaction<TxAborted> {
    pub fn was_rolled_back(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Collection, ContentId};
    use crate::storage::GitSignature;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository, Arc<RwLock<RepositoryState>>, ActiveMap) {
        let dir = TempDir::new().unwrap();
        let store =
            GitRepository::init(dir.path(), GitSignature::default(), &Collection::all_names()).unwrap();
        let state = Arc::new(RwLock::new(RepositoryState::new(RepositoryRecord::new(
            "acme", None,
        ))));
        (dir, store, state, Arc::new(RwLock::new(HashMap::new())))
    }

    fn begin(
        store: &GitRepository,
        state: &Arc<RwLock<RepositoryState>>,
        active: &ActiveMap,
    ) -> Transaction<TxActive> {
        let repository_id = state.read().id().clone();
        let metadata = TransactionMetadata {
            tx_id: "tx001".to_string(),
            repository_id,
            label: "test".to_string(),
            started_at: Utc::now(),
        };
        active.write().insert(metadata.tx_id.clone(), metadata.clone());
        Transaction::new(store.clone(), metadata, state.write_arc(), active.clone())
    }

    #[test]
    fn test_commit_persists_touched_records() {
        let (_dir, store, state, active) = setup();
        let mut tx = begin(&store, &state, &active);

        let repository_id = tx.repository_id().clone();
        let version = VersionRecord::new(repository_id.clone(), 0, None);
        tx.put_version(version.clone());
        tx.put_entry(LedgerEntry::open(
            repository_id,
            ContentId::new("a").unwrap(),
            version.id.clone(),
        ));
        assert_eq!(tx.pending_changes(), 2);

        let head_before = store.head().unwrap();
        let committed = tx.commit().unwrap();
        assert_ne!(committed.final_commit(), head_before);
        assert!(active.read().is_empty());

        let stored: Vec<VersionRecord> = store.scan(&Collection::Versions.name()).unwrap();
        assert_eq!(stored, vec![version.clone()]);
        assert!(state.read().version(&version.id).is_some());
    }

    #[test]
    fn test_rollback_restores_state() {
        let (_dir, store, state, active) = setup();
        let repository_id = state.read().id().clone();
        let version = VersionRecord::new(repository_id.clone(), 0, None);
        state.write().put_version(version.clone());

        let mut tx = begin(&store, &state, &active);
        let mut updated = version.clone();
        updated.complete = true;
        tx.put_version(updated);
        tx.put_version(VersionRecord::new(repository_id, 1, None));
        let mut repo = tx.state().repository().clone();
        repo.last_version = 1;
        tx.set_repository(repo);

        let aborted = tx.rollback();
        assert!(aborted.was_rolled_back());

        let state = state.read();
        assert_eq!(state.version(&version.id), Some(&version));
        assert!(state.version_by_number(1).is_none());
        assert_eq!(state.repository().last_version, 0);
        assert!(store.scan::<VersionRecord>(&Collection::Versions.name()).unwrap().is_empty());
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let (_dir, store, state, active) = setup();
        {
            let mut tx = begin(&store, &state, &active);
            let repository_id = tx.repository_id().clone();
            tx.put_version(VersionRecord::new(repository_id, 0, None));
        }
        assert_eq!(state.read().version_count(), 0);
        assert!(active.read().is_empty());
    }

    #[test]
    fn test_empty_commit_keeps_head() {
        let (_dir, store, state, active) = setup();
        let head = store.head().unwrap();
        let committed = begin(&store, &state, &active).commit().unwrap();
        assert_eq!(committed.final_commit(), head);
    }
}
