//! Core Git repository wrapper.
//!
//! This is the central component of the storage layer. It wraps
//! `git2::Repository` with thread-safe access and exposes the handful of
//! record-level operations the ledger needs: scanning collections on open,
//! point reads, and publishing a [`ChangeSet`] as one commit on `main`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::storage::commit::{self, CommitBuilder, CommitInfo, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::record::{self, Record};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{CollectionName, CommitId, GitSignature, RecordKey};

/// One record-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put {
        collection: CollectionName,
        record: Record,
    },
    Delete {
        collection: CollectionName,
        key: RecordKey,
    },
}

/// An ordered batch of record changes published as a single commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a typed value under `collection/key`.
    pub fn put<T: Serialize>(
        &mut self,
        collection: CollectionName,
        key: RecordKey,
        body: &T,
    ) -> StorageResult<()> {
        let record = Record::from_body(key, body)?;
        self.changes.push(Change::Put { collection, record });
        Ok(())
    }

    /// Stage a deletion. Deleting a record that was never stored is a no-op.
    pub fn delete(&mut self, collection: CollectionName, key: RecordKey) {
        self.changes.push(Change::Delete { collection, key });
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

/// The main Git repository wrapper.
///
/// Clone this to share across threads - it uses Arc internally. The inner
/// mutex doubles as the commit lock: only one change set is turned into a
/// commit at a time.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        Ok(Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
            }),
        })
    }

    /// Initialize a new store with the given (empty) collections.
    pub fn init(
        path: impl AsRef<Path>,
        signature: GitSignature,
        collections: &[CollectionName],
    ) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;

        let storage = Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
            }),
        };

        storage.with_repo(|repo| {
            let commit_id =
                commit::create_initial_commit(repo, &storage.inner.signature, collections)?;
            RefManager::init_main_branch(repo, commit_id)?;
            Ok(())
        })?;

        Ok(storage)
    }

    /// Open the store at `path`, initializing it first if needed.
    pub fn open_or_init(
        path: impl AsRef<Path>,
        signature: GitSignature,
        collections: &[CollectionName],
    ) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path, signature)
        } else {
            Self::init(path, signature, collections)
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn signature(&self) -> &GitSignature {
        &self.inner.signature
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Current tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// Read every record of a collection at `main`, decoded as `T`.
    ///
    /// A collection that was never written is treated as empty.
    pub fn scan<T: DeserializeOwned>(&self, collection: &CollectionName) -> StorageResult<Vec<T>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_main(repo)?;
            let tree = commit::get_tree_at_commit(repo, head)?;
            if !tree.collection_exists(collection) {
                return Ok(Vec::new());
            }

            let entries = tree.list_records(repo, collection)?;
            let mut values = Vec::with_capacity(entries.len());
            for (key, blob_id) in entries {
                let bytes = record::read_blob(repo, blob_id)?;
                let record = record::deserialize_record(&bytes, &key)?;
                values.push(record.decode()?);
            }
            Ok(values)
        })
    }

    /// Publish a change set as one commit on `main`.
    ///
    /// The tree is rebuilt from the current head while holding the
    /// repository lock, and `main` is moved with compare-and-swap. Nothing is
    /// published if any step fails. An empty change set returns the current
    /// head without committing.
    pub fn apply(&self, changes: &ChangeSet, message: &str) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_main(repo)?;
            if changes.is_empty() {
                return Ok(head);
            }

            let tree = commit::get_tree_at_commit(repo, head)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;

            for change in changes.iter() {
                match change {
                    Change::Put { collection, record } => {
                        let blob_id = record::write_blob(repo, record)?;
                        mutator.upsert_record(collection, &record.key, blob_id)?;
                    }
                    Change::Delete { collection, key } => {
                        match mutator.delete_record(collection, key) {
                            Ok(()) => {}
                            Err(StorageError::RecordNotFound { .. })
                            | Err(StorageError::CollectionNotFound(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            let new_tree_id = mutator.write()?;
            let commit_id = CommitBuilder::new(repo)
                .tree(new_tree_id)
                .parent(head)
                .message(message)
                .signature(self.inner.signature.clone())
                .commit()?;

            RefManager::update_main_if_unchanged(repo, head, commit_id)?;
            debug!(commit = %commit_id.short(), changes = changes.len(), "published change set");
            Ok(commit_id)
        })
    }

    /// Write one record outside of a ledger transaction.
    pub fn put_record<T: Serialize>(
        &self,
        collection: &CollectionName,
        key: &RecordKey,
        body: &T,
    ) -> StorageResult<CommitId> {
        let mut changes = ChangeSet::new();
        changes.put(collection.clone(), key.clone(), body)?;
        self.apply(&changes, &CommitMessage::registry(collection.as_str(), key.as_str()))
    }

    /// Commit history of `main`, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_main(repo)?;
            let iter = commit::history(repo, head)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    /// Number of records per collection at `main`.
    pub fn stats(&self) -> StorageResult<StorageStats> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_main(repo)?;
            let tree = commit::get_tree_at_commit(repo, head)?;

            let mut records = BTreeMap::new();
            for collection in tree.list_collections() {
                let count = tree.list_records(repo, &collection)?.len();
                records.insert(collection.to_string(), count);
            }

            let commits = commit::history(repo, head)?.count();
            Ok(StorageStats { records, commits })
        })
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Record counts of the store.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub records: BTreeMap<String, usize>,
    pub commits: usize,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Storage Statistics:")?;
        for (collection, count) in &self.records {
            writeln!(f, "  {}: {}", collection, count)?;
        }
        write!(f, "  Commits: {}", self.commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        value: u64,
    }

    fn items() -> CollectionName {
        CollectionName::new("items").unwrap()
    }

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path(), GitSignature::default(), &[items()]).unwrap();
        (dir, repo)
    }

    fn item(name: &str, value: u64) -> Item {
        Item {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();

        let repo = GitRepository::init(dir.path(), GitSignature::default(), &[items()]).unwrap();
        let head1 = repo.head().unwrap();
        drop(repo);

        let repo = GitRepository::open(dir.path(), GitSignature::default()).unwrap();
        assert_eq!(repo.head().unwrap(), head1);
    }

    #[test]
    fn test_open_or_init() {
        let dir = TempDir::new().unwrap();

        let repo1 = GitRepository::open_or_init(dir.path(), GitSignature::default(), &[]).unwrap();
        let head1 = repo1.head().unwrap();
        drop(repo1);

        let repo2 = GitRepository::open_or_init(dir.path(), GitSignature::default(), &[]).unwrap();
        assert_eq!(repo2.head().unwrap(), head1);
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path().join("nope"), GitSignature::default());
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_apply_puts_and_deletes_in_one_commit() {
        let (_dir, repo) = setup();
        let before = repo.history(None).unwrap().len();

        let mut changes = ChangeSet::new();
        changes.put(items(), RecordKey::new("a").unwrap(), &item("a", 1)).unwrap();
        changes.put(items(), RecordKey::new("b").unwrap(), &item("b", 2)).unwrap();
        repo.apply(&changes, "first").unwrap();

        let mut changes = ChangeSet::new();
        changes.delete(items(), RecordKey::new("a").unwrap());
        changes.put(items(), RecordKey::new("b").unwrap(), &item("b", 3)).unwrap();
        let head = repo.apply(&changes, "second").unwrap();

        assert_eq!(repo.history(None).unwrap().len(), before + 2);
        assert_eq!(repo.get_commit(head).unwrap().summary(), "second");

        let all: Vec<Item> = repo.scan(&items()).unwrap();
        assert_eq!(all, vec![item("b", 3)]);
    }

    #[test]
    fn test_apply_empty_change_set() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        assert_eq!(repo.apply(&ChangeSet::new(), "noop").unwrap(), head);
        assert_eq!(repo.head().unwrap(), head);
    }

    #[test]
    fn test_delete_of_unknown_record_is_ignored() {
        let (_dir, repo) = setup();
        let mut changes = ChangeSet::new();
        changes.delete(items(), RecordKey::new("ghost").unwrap());
        changes.delete(CollectionName::new("ghosts").unwrap(), RecordKey::new("g").unwrap());
        assert!(repo.apply(&changes, "ghosts").is_ok());
    }

    #[test]
    fn test_scan_unknown_collection_is_empty() {
        let (_dir, repo) = setup();
        let rows: Vec<Item> = repo.scan(&CollectionName::new("missing").unwrap()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_put_record_and_stats() {
        let (_dir, repo) = setup();
        repo.put_record(&items(), &RecordKey::new("x").unwrap(), &item("x", 9)).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.records.get("items"), Some(&1));
        assert_eq!(stats.commits, 2);

        let history = repo.history(Some(1)).unwrap();
        assert_eq!(history[0].summary(), "[REGISTER] items/x");
    }
}
