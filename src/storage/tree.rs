//! tree operations for collection management.
//!
//! in Git, a tree is a directory. In the record store:
//! - the root tree contains one directory per collection
//! - each collection directory contains record blobs (`{key}.json`)
//!
//! this module provides safe abstractions over Git's tree manipulation,
//! which is notoriously fiddly to get right.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, CollectionName, RecordKey, RecordPath, TreeId};

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// list all collections (top-level directories)
    pub fn list_collections(&self) -> Vec<CollectionName> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }
                CollectionName::new(entry.name()?).ok()
            })
            .collect()
    }

    pub fn collection_exists(&self, collection: &CollectionName) -> bool {
        self.tree
            .get_name(collection.as_str())
            .map(|entry| entry.kind() == Some(ObjectType::Tree))
            .unwrap_or(false)
    }

    /// get the tree for a specific collection
    fn collection_tree(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
    ) -> StorageResult<TreeHandle<'repo>> {
        let entry = self
            .tree
            .get_name(collection.as_str())
            .ok_or_else(|| StorageError::CollectionNotFound(collection.clone()))?;

        if entry.kind() != Some(ObjectType::Tree) {
            return Err(StorageError::UnexpectedEntryType {
                path: collection.as_str().into(),
                expected: "tree (directory)".to_string(),
                found: format!("{:?}", entry.kind()),
            });
        }

        Ok(TreeHandle::new(repo.find_tree(entry.id())?))
    }

    /// list all records in a collection as (key, blob) pairs
    pub fn list_records(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
    ) -> StorageResult<Vec<(RecordKey, BlobId)>> {
        let collection_tree = self.collection_tree(repo, collection)?;

        let records = collection_tree
            .tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return None;
                }
                let key = entry.name()?.strip_suffix(".json")?;
                let key = RecordKey::new(key).ok()?;
                Some((key, BlobId::new(entry.id())))
            })
            .collect();

        Ok(records)
    }
}

/// a mutable tree builder for making changes
///
/// this accumulates changes and produces a new tree when written;
/// the original tree is not modified
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_record(&versions, &key, blob_id)?;
/// mutator.delete_record(&ledger_entries, &other)?;
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// builders for collections touched so far
    modified: HashMap<String, Git2TreeBuilder<'repo>>,
    /// tree IDs of collections present in the original tree
    original: HashMap<String, git2::Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let mut original = HashMap::new();
        for entry in tree.inner().iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified: HashMap::new(),
            original,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified: HashMap::new(),
            original: HashMap::new(),
        })
    }

    /// get or create a builder for a collection's subtree
    fn collection_builder(&mut self, collection: &str) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        if !self.modified.contains_key(collection) {
            let builder = match self.original.get(collection) {
                Some(original_id) => {
                    let original_tree = self.repo.find_tree(*original_id)?;
                    self.repo.treebuilder(Some(&original_tree))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified.insert(collection.to_string(), builder);
        }

        self.modified
            .get_mut(collection)
            .ok_or_else(|| StorageError::Internal(format!("missing builder for {}", collection)))
    }

    /// make sure a collection directory exists, creating it empty if needed
    pub fn ensure_collection(&mut self, collection: &CollectionName) -> StorageResult<()> {
        self.collection_builder(collection.as_str())?;
        Ok(())
    }

    /// insert or replace a record
    pub fn upsert_record(
        &mut self,
        collection: &CollectionName,
        key: &RecordKey,
        blob_id: BlobId,
    ) -> StorageResult<()> {
        let file_name = RecordPath::new(collection.clone(), key.clone()).file_name();
        let builder = self.collection_builder(collection.as_str())?;
        builder.insert(&file_name, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// delete a record, failing if it does not exist
    pub fn delete_record(&mut self, collection: &CollectionName, key: &RecordKey) -> StorageResult<()> {
        if !self.modified.contains_key(collection.as_str())
            && !self.original.contains_key(collection.as_str())
        {
            return Err(StorageError::CollectionNotFound(collection.clone()));
        }

        let file_name = RecordPath::new(collection.clone(), key.clone()).file_name();
        let builder = self.collection_builder(collection.as_str())?;

        // git2 errors on a missing entry; surface it as a missing record
        builder.remove(&file_name).map_err(|_| StorageError::RecordNotFound {
            collection: collection.clone(),
            key: key.clone(),
        })?;

        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (collection, builder) in self.modified {
            let collection_tree_id = builder.write()?;
            self.root_builder
                .insert(&collection, collection_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// build the initial tree: one empty directory per collection
pub fn create_initial_tree(repo: &Repository, collections: &[CollectionName]) -> StorageResult<TreeId> {
    let mut mutator = TreeMutator::empty(repo)?;
    for collection in collections {
        mutator.ensure_collection(collection)?;
    }
    mutator.write()
}
