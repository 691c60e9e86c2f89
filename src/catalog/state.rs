//! In-memory state of one repository.
//!
//! A `RepositoryState` holds every record that belongs to a repository along
//! with the secondary indexes the ledger queries need: version number order,
//! entries by content, and entries by the version that opened or closed them.
//!
//! Mutators return the value they displaced so a transaction can journal it
//! and restore the state on rollback.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use serde::Serialize;

use crate::catalog::types::{
    Collection, ContentId, CountRecord, EntryId, LedgerEntry, PendingVersion, RepositoryId,
    RepositoryRecord, VersionId, VersionRecord,
};
use crate::storage::{ChangeSet, RecordKey, StorageResult};

/// Addresses one persisted record inside a repository's state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowRef {
    Repository,
    Version(VersionId),
    Entry(EntryId),
    Counts(VersionId),
    Pending(VersionId),
}

#[derive(Debug, Clone)]
pub struct RepositoryState {
    repository: RepositoryRecord,
    versions: HashMap<VersionId, VersionRecord>,
    numbers: BTreeMap<u64, VersionId>,
    entries: HashMap<EntryId, LedgerEntry>,
    by_content: HashMap<ContentId, BTreeSet<EntryId>>,
    by_added: HashMap<VersionId, BTreeSet<EntryId>>,
    by_removed: HashMap<VersionId, BTreeSet<EntryId>>,
    counts: HashMap<VersionId, CountRecord>,
    pending: HashMap<VersionId, PendingVersion>,
}

impl RepositoryState {
    pub fn new(repository: RepositoryRecord) -> Self {
        Self {
            repository,
            versions: HashMap::new(),
            numbers: BTreeMap::new(),
            entries: HashMap::new(),
            by_content: HashMap::new(),
            by_added: HashMap::new(),
            by_removed: HashMap::new(),
            counts: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    // ==================== Queries ====================

    pub fn id(&self) -> &RepositoryId {
        &self.repository.id
    }

    pub fn repository(&self) -> &RepositoryRecord {
        &self.repository
    }

    pub fn version(&self, id: &VersionId) -> Option<&VersionRecord> {
        self.versions.get(id)
    }

    pub fn version_by_number(&self, number: u64) -> Option<&VersionRecord> {
        self.numbers.get(&number).and_then(|id| self.versions.get(id))
    }

    pub fn number_of(&self, id: &VersionId) -> Option<u64> {
        self.versions.get(id).map(|v| v.number)
    }

    /// All versions in ascending number order.
    pub fn versions(&self) -> impl Iterator<Item = &VersionRecord> + '_ {
        self.numbers.values().filter_map(|id| self.versions.get(id))
    }

    /// Versions with a number at or below `number`, ascending.
    pub fn versions_up_to(&self, number: u64) -> impl Iterator<Item = &VersionRecord> + '_ {
        self.numbers
            .range(..=number)
            .filter_map(|(_, id)| self.versions.get(id))
    }

    /// The lowest-numbered complete version above `number`.
    pub fn next_complete_after(&self, number: u64) -> Option<&VersionRecord> {
        self.numbers
            .range(number.saturating_add(1)..)
            .filter_map(|(_, id)| self.versions.get(id))
            .find(|v| v.complete)
    }

    /// The highest-numbered complete version.
    pub fn latest_complete(&self) -> Option<&VersionRecord> {
        self.numbers
            .values()
            .rev()
            .filter_map(|id| self.versions.get(id))
            .find(|v| v.complete)
    }

    pub fn building_versions(&self) -> impl Iterator<Item = &VersionRecord> + '_ {
        self.versions().filter(|v| !v.complete)
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn entry(&self, id: &EntryId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries_for_content<'a>(
        &'a self,
        content: &ContentId,
    ) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        Self::resolve(&self.entries, self.by_content.get(content))
    }

    /// Entries whose membership begins at `version`.
    pub fn entries_added_in<'a>(
        &'a self,
        version: &VersionId,
    ) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        Self::resolve(&self.entries, self.by_added.get(version))
    }

    /// Entries whose membership ends at `version`.
    pub fn entries_removed_in<'a>(
        &'a self,
        version: &VersionId,
    ) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        Self::resolve(&self.entries, self.by_removed.get(version))
    }

    fn resolve<'a>(
        entries: &'a HashMap<EntryId, LedgerEntry>,
        ids: Option<&'a BTreeSet<EntryId>>,
    ) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        ids.into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |id| entries.get(id))
    }

    pub fn counts(&self, version: &VersionId) -> Option<&CountRecord> {
        self.counts.get(version)
    }

    pub fn pending(&self, version: &VersionId) -> Option<&PendingVersion> {
        self.pending.get(version)
    }

    pub fn pending_versions(&self) -> impl Iterator<Item = &PendingVersion> + '_ {
        self.pending.values()
    }

    // ==================== Mutators ====================

    /// Replace the repository record, returning the previous one.
    pub fn replace_repository(&mut self, record: RepositoryRecord) -> RepositoryRecord {
        std::mem::replace(&mut self.repository, record)
    }

    pub fn put_version(&mut self, record: VersionRecord) -> Option<VersionRecord> {
        let previous = self.versions.insert(record.id.clone(), record.clone());
        if let Some(prev) = &previous {
            if self.numbers.get(&prev.number) == Some(&prev.id) {
                self.numbers.remove(&prev.number);
            }
        }
        self.numbers.insert(record.number, record.id);
        previous
    }

    pub fn remove_version(&mut self, id: &VersionId) -> Option<VersionRecord> {
        let previous = self.versions.remove(id)?;
        if self.numbers.get(&previous.number) == Some(id) {
            self.numbers.remove(&previous.number);
        }
        Some(previous)
    }

    pub fn put_entry(&mut self, entry: LedgerEntry) -> Option<LedgerEntry> {
        let previous = self.remove_entry(&entry.id);

        self.by_content
            .entry(entry.content_id.clone())
            .or_default()
            .insert(entry.id.clone());
        self.by_added
            .entry(entry.version_added_id.clone())
            .or_default()
            .insert(entry.id.clone());
        if let Some(removed) = &entry.version_removed_id {
            self.by_removed
                .entry(removed.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry);

        previous
    }

    pub fn remove_entry(&mut self, id: &EntryId) -> Option<LedgerEntry> {
        let previous = self.entries.remove(id)?;

        unindex(&mut self.by_content, &previous.content_id, id);
        unindex(&mut self.by_added, &previous.version_added_id, id);
        if let Some(removed) = &previous.version_removed_id {
            unindex(&mut self.by_removed, removed, id);
        }

        Some(previous)
    }

    pub fn put_counts(&mut self, record: CountRecord) -> Option<CountRecord> {
        self.counts.insert(record.version_id.clone(), record)
    }

    pub fn remove_counts(&mut self, version: &VersionId) -> Option<CountRecord> {
        self.counts.remove(version)
    }

    pub fn put_pending(&mut self, record: PendingVersion) -> Option<PendingVersion> {
        self.pending.insert(record.version_id.clone(), record)
    }

    pub fn remove_pending(&mut self, version: &VersionId) -> Option<PendingVersion> {
        self.pending.remove(version)
    }

    // ==================== Persistence ====================

    /// Stage the current value of `row` into `changes`: a put when the row
    /// exists, a delete when it does not.
    pub fn stage(&self, row: &RowRef, changes: &mut ChangeSet) -> StorageResult<()> {
        match row {
            RowRef::Repository => changes.put(
                Collection::Repositories.name(),
                self.repository.id.record_key(),
                &self.repository,
            ),
            RowRef::Version(id) => {
                stage_row(changes, Collection::Versions, id.record_key(), self.versions.get(id))
            }
            RowRef::Entry(id) => {
                stage_row(changes, Collection::LedgerEntries, id.record_key(), self.entries.get(id))
            }
            RowRef::Counts(id) => {
                stage_row(changes, Collection::CountSummaries, id.record_key(), self.counts.get(id))
            }
            RowRef::Pending(id) => {
                stage_row(changes, Collection::PendingVersions, id.record_key(), self.pending.get(id))
            }
        }
    }
}

fn stage_row<T: Serialize>(
    changes: &mut ChangeSet,
    collection: Collection,
    key: RecordKey,
    value: Option<&T>,
) -> StorageResult<()> {
    match value {
        Some(value) => changes.put(collection.name(), key, value),
        None => {
            changes.delete(collection.name(), key);
            Ok(())
        }
    }
}

fn unindex<K: Hash + Eq>(index: &mut HashMap<K, BTreeSet<EntryId>>, key: &K, id: &EntryId) {
    if let Some(set) = index.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}
