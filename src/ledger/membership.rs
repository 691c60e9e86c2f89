//! Membership ledger: content deltas and interval queries.
//!
//! Content `c` is in version `N` when some entry for `c` was added at a
//! version numbered `<= N` and is either still open or was removed at a
//! version numbered `> N`. Queries walk the version-number index up to `N`
//! and follow the per-version entry indexes, so cost tracks the deltas of
//! the versions involved rather than the size of the ledger.

use std::collections::BTreeSet;

use tracing::debug;

use crate::catalog::{ContentId, LedgerEntry, RepositoryState, VersionId, VersionRecord};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TxActive};

pub struct MembershipLedger;

impl MembershipLedger {
    /// Content present in the version numbered `number`.
    pub fn content_at(state: &RepositoryState, number: u64) -> BTreeSet<ContentId> {
        let mut present = BTreeSet::new();
        for version in state.versions_up_to(number) {
            for entry in state.entries_added_in(&version.id) {
                if Self::open_after(state, entry, number) {
                    present.insert(entry.content_id.clone());
                }
            }
        }
        present
    }

    pub fn contains_at(state: &RepositoryState, number: u64, content: &ContentId) -> bool {
        state
            .entries_for_content(content)
            .any(|entry| Self::covers(state, entry, number))
    }

    /// Content whose membership starts at `version`.
    pub fn added_in(state: &RepositoryState, version: &VersionId) -> BTreeSet<ContentId> {
        state
            .entries_added_in(version)
            .map(|e| e.content_id.clone())
            .collect()
    }

    /// Content whose membership ends at `version`.
    pub fn removed_in(state: &RepositoryState, version: &VersionId) -> BTreeSet<ContentId> {
        state
            .entries_removed_in(version)
            .map(|e| e.content_id.clone())
            .collect()
    }

    fn covers(state: &RepositoryState, entry: &LedgerEntry, number: u64) -> bool {
        let added = state.number_of(&entry.version_added_id);
        added.is_some_and(|n| n <= number) && Self::open_after(state, entry, number)
    }

    fn open_after(state: &RepositoryState, entry: &LedgerEntry, number: u64) -> bool {
        match &entry.version_removed_id {
            None => true,
            Some(removed) => state.number_of(removed).map_or(true, |n| n > number),
        }
    }

    /// Look up `version` and make sure its content may still change.
    pub fn mutable_version<'a>(
        state: &'a RepositoryState,
        version: &VersionId,
    ) -> LedgerResult<&'a VersionRecord> {
        let record = state
            .version(version)
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))?;
        if record.complete {
            return Err(LedgerError::ImmutableVersion {
                repository: state.repository().name.clone(),
                number: record.number,
            });
        }
        Ok(record)
    }

    /// Add every id in `ids` not already present in `version`.
    ///
    /// Each added id gets a new open entry, even when this same version
    /// removed it earlier. Returns the number of ids that changed.
    pub fn add_content(
        tx: &mut Transaction<TxActive>,
        version: &VersionId,
        ids: &BTreeSet<ContentId>,
    ) -> LedgerResult<usize> {
        let state = tx.state();
        let record = Self::mutable_version(state, version)?;

        let writes: Vec<LedgerEntry> = ids
            .iter()
            .filter(|id| !Self::contains_at(state, record.number, id))
            .map(|id| LedgerEntry::open(state.id().clone(), id.clone(), version.clone()))
            .collect();

        debug!(
            repository = %state.repository().name,
            number = record.number,
            count = writes.len(),
            "adding content"
        );
        let changed = writes.len();
        for entry in writes {
            tx.put_entry(entry);
        }
        Ok(changed)
    }

    /// Close the open entry of every id in `ids` at `version`.
    ///
    /// Absent ids are skipped. An entry opened by this same version is
    /// closed too and keeps its empty interval. Returns the number of ids
    /// that changed.
    pub fn remove_content(
        tx: &mut Transaction<TxActive>,
        version: &VersionId,
        ids: &BTreeSet<ContentId>,
    ) -> LedgerResult<usize> {
        let state = tx.state();
        let record = Self::mutable_version(state, version)?;

        let mut closed = Vec::new();
        for id in ids {
            let open = state.entries_for_content(id).find(|e| {
                e.is_open()
                    && state
                        .number_of(&e.version_added_id)
                        .is_some_and(|n| n <= record.number)
            });
            if let Some(entry) = open {
                closed.push(LedgerEntry {
                    version_removed_id: Some(version.clone()),
                    ..entry.clone()
                });
            }
        }

        debug!(
            repository = %state.repository().name,
            number = record.number,
            count = closed.len(),
            "removing content"
        );
        let changed = closed.len();
        for entry in closed {
            tx.put_entry(entry);
        }
        Ok(changed)
    }
}
