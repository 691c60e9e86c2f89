//! Handle to a single version of a repository.

use std::collections::BTreeSet;

use crate::catalog::{ContentId, CountSummary, RepositoryId, VersionId, VersionRecord};
use crate::ledger::{Ledger, LedgerResult, SquashOutcome};

/// A version of a repository: a set of content that can be changed while
/// the version is building and is frozen once it is complete.
///
/// The handle carries the identity of the version. Queries always go to
/// the ledger, so a handle never sees stale content.
#[derive(Clone)]
pub struct VersionHandle {
    ledger: Ledger,
    id: VersionId,
    repository_id: RepositoryId,
    number: u64,
    base_version_id: Option<VersionId>,
}

impl VersionHandle {
    pub(crate) fn new(ledger: Ledger, record: VersionRecord) -> Self {
        Self {
            ledger,
            id: record.id,
            repository_id: record.repository_id,
            number: record.number,
            base_version_id: record.base_version_id,
        }
    }

    pub fn id(&self) -> &VersionId {
        &self.id
    }

    pub fn repository_id(&self) -> &RepositoryId {
        &self.repository_id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn base_version_id(&self) -> Option<&VersionId> {
        self.base_version_id.as_ref()
    }

    /// The current record of this version.
    pub fn record(&self) -> LedgerResult<VersionRecord> {
        self.ledger.record(&self.id)
    }

    pub fn is_complete(&self) -> LedgerResult<bool> {
        Ok(self.record()?.complete)
    }

    /// Content present in this version.
    pub fn content(&self) -> LedgerResult<BTreeSet<ContentId>> {
        self.ledger.content(&self.id, None)
    }

    /// Content present in the repository as of version number `number`.
    pub fn content_at(&self, number: u64) -> LedgerResult<BTreeSet<ContentId>> {
        self.ledger.content(&self.id, Some(number))
    }

    /// Content this version added.
    pub fn added(&self) -> LedgerResult<BTreeSet<ContentId>> {
        self.ledger.added(&self.id)
    }

    /// Content this version removed.
    pub fn removed(&self) -> LedgerResult<BTreeSet<ContentId>> {
        self.ledger.removed(&self.id)
    }

    pub fn contains(&self, content: &ContentId) -> LedgerResult<bool> {
        self.ledger.contains(&self.id, content)
    }

    /// Add content to this version. Returns how many ids were not already present.
    pub fn add_content<'a, I>(&self, ids: I) -> LedgerResult<usize>
    where
        I: IntoIterator<Item = &'a ContentId>,
    {
        let ids: BTreeSet<ContentId> = ids.into_iter().cloned().collect();
        self.ledger.add_content(&self.id, &ids)
    }

    /// Remove content from this version. Returns how many ids were present.
    pub fn remove_content<'a, I>(&self, ids: I) -> LedgerResult<usize>
    where
        I: IntoIterator<Item = &'a ContentId>,
    {
        let ids: BTreeSet<ContentId> = ids.into_iter().cloned().collect();
        self.ledger.remove_content(&self.id, &ids)
    }

    /// Mark the version complete and compute its counts.
    ///
    /// Returns `false` if it was already complete.
    pub fn finalize(&self) -> LedgerResult<bool> {
        self.ledger.finalize(&self.id)
    }

    /// Delete the version. Every other version keeps its content.
    pub fn delete(self) -> LedgerResult<SquashOutcome> {
        self.ledger.delete_version(&self.id)
    }

    pub fn counts(&self) -> LedgerResult<Vec<CountSummary>> {
        self.ledger.counts(&self.id)
    }
}

impl PartialEq for VersionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VersionHandle {}

impl std::fmt::Debug for VersionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionHandle")
            .field("id", &self.id)
            .field("repository_id", &self.repository_id)
            .field("number", &self.number)
            .finish()
    }
}

impl std::fmt::Display for VersionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "version {} ({})", self.number, self.id)
    }
}
