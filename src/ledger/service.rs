//! The ledger service.
//!
//! `Ledger` owns the loaded repository states (through the transaction
//! manager), the content registry and two small indexes: version id to
//! repository, and repository name to id. Every mutating call runs as one
//! transaction on one repository.
//!
//! Lock order is registry, then repository state, then the version index.
//! The indexes are only ever locked briefly and never while waiting on a
//! repository.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::catalog::{
    Collection, ContentId, ContentRegistry, ContentType, ContentUnit, CountRecord, CountSummary,
    LedgerEntry, PendingVersion, Registration, RepositoryId, RepositoryRecord, RepositoryState,
    VersionId, VersionRecord,
};
use crate::ledger::counter::ContentCounter;
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::membership::MembershipLedger;
use crate::ledger::squash::{SquashEngine, SquashOutcome};
use crate::storage::{GitRepository, StorageError};
use crate::transaction::TransactionManager;
use crate::version::VersionHandle;

/// Versions discarded and counts rebuilt by [`Ledger::recover`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// `repository#number` of every abandoned version that was discarded.
    pub discarded: Vec<String>,
    /// Complete versions whose missing counts were recomputed.
    pub recounted: usize,
    /// Pending markers that pointed at no version.
    pub orphaned_markers: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.discarded.is_empty() && self.recounted == 0 && self.orphaned_markers == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub repositories: usize,
    pub versions: usize,
    pub complete_versions: usize,
    pub building_versions: usize,
    pub entries: usize,
    pub content_units: usize,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "repositories:  {}", self.repositories)?;
        writeln!(
            f,
            "versions:      {} ({} complete, {} building)",
            self.versions, self.complete_versions, self.building_versions
        )?;
        writeln!(f, "entries:       {}", self.entries)?;
        write!(f, "content units: {}", self.content_units)
    }
}

/// Thread-safe handle to the ledger. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    transactions: TransactionManager,
    registry: ContentRegistry,
    /// Which repository each version belongs to.
    versions: RwLock<HashMap<VersionId, RepositoryId>>,
    /// Repository ids by name. The write lock also serializes creation.
    names: RwLock<HashMap<String, RepositoryId>>,
    /// Building versions created by this process and not yet finished.
    live: Mutex<HashSet<VersionId>>,
}

impl Ledger {
    /// Load every record from `store` and rebuild the in-memory indexes.
    pub fn load(store: GitRepository) -> LedgerResult<Self> {
        let repositories: Vec<RepositoryRecord> = store.scan(&Collection::Repositories.name())?;
        let versions: Vec<VersionRecord> = store.scan(&Collection::Versions.name())?;
        let entries: Vec<LedgerEntry> = store.scan(&Collection::LedgerEntries.name())?;
        let counts: Vec<CountRecord> = store.scan(&Collection::CountSummaries.name())?;
        let pending: Vec<PendingVersion> = store.scan(&Collection::PendingVersions.name())?;

        let mut states: HashMap<RepositoryId, RepositoryState> = HashMap::new();
        let mut names = HashMap::new();
        for repository in repositories {
            names.insert(repository.name.clone(), repository.id.clone());
            states.insert(repository.id.clone(), RepositoryState::new(repository));
        }

        let mut version_index = HashMap::new();
        for version in versions {
            let state = state_for(&mut states, &version.repository_id, Collection::Versions, version.id.as_str())?;
            if state.version_by_number(version.number).is_some() {
                return Err(LedgerError::DuplicateVersionNumber {
                    repository: state.repository().name.clone(),
                    number: version.number,
                });
            }
            version_index.insert(version.id.clone(), version.repository_id.clone());
            state.put_version(version);
        }
        for entry in entries {
            state_for(&mut states, &entry.repository_id, Collection::LedgerEntries, entry.id.as_str())?
                .put_entry(entry);
        }
        for record in counts {
            state_for(&mut states, &record.repository_id, Collection::CountSummaries, record.version_id.as_str())?
                .put_counts(record);
        }
        for record in pending {
            state_for(&mut states, &record.repository_id, Collection::PendingVersions, record.version_id.as_str())?
                .put_pending(record);
        }

        let registry = ContentRegistry::load(store.clone())?;
        let transactions = TransactionManager::new(store);
        let repository_count = states.len();
        for state in states.into_values() {
            transactions.install(state);
        }

        info!(
            repositories = repository_count,
            versions = version_index.len(),
            content = registry.len(),
            "loaded ledger"
        );

        Ok(Self {
            inner: Arc::new(LedgerInner {
                transactions,
                registry,
                versions: RwLock::new(version_index),
                names: RwLock::new(names),
                live: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    pub fn store(&self) -> &GitRepository {
        self.inner.transactions.store()
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.inner.registry
    }

    // ==================== Repositories ====================

    /// Create an empty repository. Names are unique.
    pub fn create_repository(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> LedgerResult<RepositoryRecord> {
        let name = name.trim();
        validate_repository_name(name)?;

        let mut names = self.inner.names.write();
        if names.contains_key(name) {
            return Err(LedgerError::RepositoryAlreadyExists(name.to_string()));
        }

        let record = RepositoryRecord::new(name, description.map(str::to_string));
        self.store()
            .put_record(&Collection::Repositories.name(), &record.id.record_key(), &record)?;
        self.inner
            .transactions
            .install(RepositoryState::new(record.clone()));
        names.insert(record.name.clone(), record.id.clone());

        info!(repository = %record.name, id = %record.id, "created repository");
        Ok(record)
    }

    pub fn repository(&self, id: &RepositoryId) -> LedgerResult<RepositoryRecord> {
        self.inner
            .transactions
            .read(id, |s| s.repository().clone())
            .map_err(|_| LedgerError::RepositoryNotFound(id.to_string()))
    }

    pub fn repository_by_name(&self, name: &str) -> LedgerResult<RepositoryRecord> {
        let id = self
            .inner
            .names
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::RepositoryNotFound(name.to_string()))?;
        self.repository(&id)
    }

    /// All repositories, ordered by name.
    pub fn list_repositories(&self) -> Vec<RepositoryRecord> {
        let mut records: Vec<RepositoryRecord> = self
            .inner
            .transactions
            .repository_ids()
            .iter()
            .filter_map(|id| self.repository(id).ok())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    // ==================== Content ====================

    /// Register a content unit. Registering the same id and type again
    /// returns the existing unit.
    pub fn register_content(
        &self,
        id: ContentId,
        content_type: ContentType,
    ) -> LedgerResult<ContentUnit> {
        match self.inner.registry.register(id, content_type.clone())? {
            Registration::Created(unit) | Registration::Existing(unit) => Ok(unit),
            Registration::Conflict(unit) => Err(LedgerError::ContentTypeMismatch {
                id: unit.id,
                registered: unit.content_type,
                requested: content_type,
            }),
        }
    }

    pub fn content_unit(&self, id: &ContentId) -> Option<ContentUnit> {
        self.inner.registry.get(id)
    }

    // ==================== Versions ====================

    /// Create a building version numbered one past the last assigned number.
    ///
    /// With a `base` the new version's content is made equal to the base's,
    /// which may belong to any repository. Without one it starts out with
    /// the content of its predecessor.
    pub fn create_version(
        &self,
        repository: &RepositoryId,
        base: Option<&VersionId>,
    ) -> LedgerResult<VersionHandle> {
        let repository_name = self.repository(repository)?.name;

        // read before locking the target; the base may live in the same repository
        let base_content = match base {
            Some(base) => Some(self.content(base, None)?),
            None => None,
        };

        let label = format!("create version in {}", repository_name);
        let record = self.inner.transactions.with_transaction(repository, label, |tx| {
            let mut root = tx.state().repository().clone();
            let number = root.last_version + 1;
            if tx.state().version_by_number(number).is_some() {
                return Err(LedgerError::DuplicateVersionNumber {
                    repository: root.name,
                    number,
                });
            }

            let version = VersionRecord::new(repository.clone(), number, base.cloned());
            root.last_version = number;
            tx.set_repository(root);
            tx.put_version(version.clone());
            tx.put_pending(PendingVersion {
                version_id: version.id.clone(),
                repository_id: repository.clone(),
                created_at: Utc::now(),
            });

            if let Some(target) = &base_content {
                let current = MembershipLedger::content_at(tx.state(), number);
                let stale: BTreeSet<ContentId> = current.difference(target).cloned().collect();
                let missing: BTreeSet<ContentId> = target.difference(&current).cloned().collect();
                MembershipLedger::remove_content(tx, &version.id, &stale)?;
                MembershipLedger::add_content(tx, &version.id, &missing)?;
            }
            Ok(version)
        })?;

        self.inner
            .versions
            .write()
            .insert(record.id.clone(), repository.clone());
        self.inner.live.lock().insert(record.id.clone());

        info!(
            repository = %repository_name,
            number = record.number,
            base = ?record.base_version_id.as_ref().map(VersionId::as_str),
            "created version"
        );
        Ok(VersionHandle::new(self.clone(), record))
    }

    pub fn version(&self, id: &VersionId) -> LedgerResult<VersionHandle> {
        let record = self.record(id)?;
        Ok(VersionHandle::new(self.clone(), record))
    }

    pub fn version_by_number(
        &self,
        repository: &RepositoryId,
        number: u64,
    ) -> LedgerResult<VersionHandle> {
        let record = self
            .inner
            .transactions
            .read(repository, |s| s.version_by_number(number).cloned())
            .map_err(|_| LedgerError::RepositoryNotFound(repository.to_string()))?
            .ok_or_else(|| LedgerError::VersionNotFound(format!("{}#{}", repository, number)))?;
        Ok(VersionHandle::new(self.clone(), record))
    }

    /// Every version of `repository` in number order, building ones included.
    pub fn versions(&self, repository: &RepositoryId) -> LedgerResult<Vec<VersionRecord>> {
        self.inner
            .transactions
            .read(repository, |s| s.versions().cloned().collect())
            .map_err(|_| LedgerError::RepositoryNotFound(repository.to_string()))
    }

    /// The highest-numbered complete version.
    pub fn latest(&self, repository: &RepositoryId) -> LedgerResult<Option<VersionHandle>> {
        let record = self
            .inner
            .transactions
            .read(repository, |s| s.latest_complete().cloned())
            .map_err(|_| LedgerError::RepositoryNotFound(repository.to_string()))?;
        Ok(record.map(|r| VersionHandle::new(self.clone(), r)))
    }

    /// The lowest-numbered complete version after `version`.
    pub fn next(&self, version: &VersionId) -> LedgerResult<Option<VersionHandle>> {
        let repository = self.locate(version)?;
        let record = self.inner.transactions.read(&repository, |s| {
            s.number_of(version)
                .map(|n| s.next_complete_after(n).cloned())
        })?;
        match record {
            Some(next) => Ok(next.map(|r| VersionHandle::new(self.clone(), r))),
            None => Err(LedgerError::VersionNotFound(version.to_string())),
        }
    }

    /// Delete a version, squashing its deltas into its successor.
    pub fn delete_version(&self, version: &VersionId) -> LedgerResult<SquashOutcome> {
        let (repository, tag) = self.tagged(version)?;
        let outcome = self
            .inner
            .transactions
            .with_transaction(&repository, format!("delete {}", tag), |tx| {
                SquashEngine::delete(tx, version, &self.inner.registry)
            })?;

        self.inner.versions.write().remove(version);
        self.inner.live.lock().remove(version);
        Ok(outcome)
    }

    /// Stored counts of `version`; empty until it has been finalized.
    pub fn counts(&self, version: &VersionId) -> LedgerResult<Vec<CountSummary>> {
        let repository = self.locate(version)?;
        let counts = self.inner.transactions.read(&repository, |s| {
            s.version(version)
                .map(|_| s.counts(version).map(|c| c.summaries.clone()).unwrap_or_default())
        })?;
        counts.ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    /// Recompute and store the counts of `version`.
    pub fn recompute_counts(&self, version: &VersionId) -> LedgerResult<Vec<CountSummary>> {
        let (repository, tag) = self.tagged(version)?;
        self.inner
            .transactions
            .with_transaction(&repository, format!("recount {}", tag), |tx| {
                ContentCounter::compute(tx, version, &self.inner.registry)
            })
    }

    // ==================== Version internals ====================

    fn locate(&self, version: &VersionId) -> LedgerResult<RepositoryId> {
        self.inner
            .versions
            .read()
            .get(version)
            .cloned()
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    /// The owning repository and a `name#number` tag for messages.
    fn tagged(&self, version: &VersionId) -> LedgerResult<(RepositoryId, String)> {
        let repository = self.locate(version)?;
        let tag = self.inner.transactions.read(&repository, |s| {
            s.number_of(version)
                .map(|n| format!("{}#{}", s.repository().name, n))
        })?;
        tag.map(|tag| (repository, tag))
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    pub(crate) fn record(&self, version: &VersionId) -> LedgerResult<VersionRecord> {
        let repository = self.locate(version)?;
        self.inner
            .transactions
            .read(&repository, |s| s.version(version).cloned())?
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    /// Content of the repository at `as_of`, defaulting to the number of `version`.
    pub(crate) fn content(
        &self,
        version: &VersionId,
        as_of: Option<u64>,
    ) -> LedgerResult<BTreeSet<ContentId>> {
        let repository = self.locate(version)?;
        self.inner
            .transactions
            .read(&repository, |s| {
                let number = as_of.or_else(|| s.number_of(version))?;
                Some(MembershipLedger::content_at(s, number))
            })?
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    pub(crate) fn added(&self, version: &VersionId) -> LedgerResult<BTreeSet<ContentId>> {
        self.with_version(version, |s| MembershipLedger::added_in(s, version))
    }

    pub(crate) fn removed(&self, version: &VersionId) -> LedgerResult<BTreeSet<ContentId>> {
        self.with_version(version, |s| MembershipLedger::removed_in(s, version))
    }

    pub(crate) fn contains(&self, version: &VersionId, content: &ContentId) -> LedgerResult<bool> {
        self.with_version(version, |s| {
            s.number_of(version)
                .is_some_and(|n| MembershipLedger::contains_at(s, n, content))
        })
    }

    fn with_version<F, T>(&self, version: &VersionId, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&RepositoryState) -> T,
    {
        let repository = self.locate(version)?;
        self.inner
            .transactions
            .read(&repository, |s| s.version(version).map(|_| f(s)))?
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))
    }

    pub(crate) fn add_content(
        &self,
        version: &VersionId,
        ids: &BTreeSet<ContentId>,
    ) -> LedgerResult<usize> {
        if let Some(unknown) = self.inner.registry.first_unknown(ids) {
            return Err(LedgerError::ContentNotFound(unknown));
        }
        let (repository, tag) = self.tagged(version)?;
        self.inner
            .transactions
            .with_transaction(&repository, format!("add content to {}", tag), |tx| {
                MembershipLedger::add_content(tx, version, ids)
            })
    }

    pub(crate) fn remove_content(
        &self,
        version: &VersionId,
        ids: &BTreeSet<ContentId>,
    ) -> LedgerResult<usize> {
        if let Some(unknown) = self.inner.registry.first_unknown(ids) {
            return Err(LedgerError::ContentNotFound(unknown));
        }
        let (repository, tag) = self.tagged(version)?;
        self.inner
            .transactions
            .with_transaction(&repository, format!("remove content from {}", tag), |tx| {
                MembershipLedger::remove_content(tx, version, ids)
            })
    }

    /// Complete `version` and compute its counts. Returns false if it was
    /// already complete.
    pub(crate) fn finalize(&self, version: &VersionId) -> LedgerResult<bool> {
        let (repository, tag) = self.tagged(version)?;
        let finalized = self
            .inner
            .transactions
            .with_transaction(&repository, format!("finalize {}", tag), |tx| -> LedgerResult<bool> {
                let record = tx
                    .state()
                    .version(version)
                    .cloned()
                    .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))?;
                if record.complete {
                    return Ok(false);
                }
                tx.put_version(VersionRecord {
                    complete: true,
                    ..record
                });
                tx.remove_pending(version);
                ContentCounter::compute(tx, version, &self.inner.registry)?;
                Ok(true)
            })?;

        if finalized {
            self.inner.live.lock().remove(version);
            info!(version = %tag, "finalized version");
        }
        Ok(finalized)
    }

    // ==================== Maintenance ====================

    /// Discard building versions no live handle owns, drop pending markers
    /// without a version, and compute counts missing from complete versions.
    pub fn recover(&self) -> LedgerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let live: HashSet<VersionId> = self.inner.live.lock().clone();

        for repository in self.inner.transactions.repository_ids() {
            let (mut abandoned, uncounted, orphans) =
                self.inner.transactions.read(&repository, |s| {
                    let abandoned: Vec<(u64, VersionId)> = s
                        .building_versions()
                        .filter(|v| !live.contains(&v.id))
                        .map(|v| (v.number, v.id.clone()))
                        .collect();
                    let uncounted: Vec<VersionId> = s
                        .versions()
                        .filter(|v| v.complete && s.counts(&v.id).is_none())
                        .map(|v| v.id.clone())
                        .collect();
                    let orphans: Vec<VersionId> = s
                        .pending_versions()
                        .filter(|p| s.version(&p.version_id).is_none())
                        .map(|p| p.version_id.clone())
                        .collect();
                    (abandoned, uncounted, orphans)
                })?;

            // newest first so each discard can hand its number back
            abandoned.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, version) in abandoned {
                let (_, tag) = self.tagged(&version)?;
                self.delete_version(&version)?;
                warn!(version = %tag, "discarded abandoned version");
                report.discarded.push(tag);
            }

            for version in uncounted {
                self.recompute_counts(&version)?;
                report.recounted += 1;
            }

            if !orphans.is_empty() {
                self.inner
                    .transactions
                    .with_transaction(&repository, "drop orphaned pending markers", |tx| {
                        for version in &orphans {
                            tx.remove_pending(version);
                        }
                        Ok::<_, LedgerError>(())
                    })?;
                report.orphaned_markers += orphans.len();
            }
        }

        if !report.is_clean() {
            info!(
                discarded = report.discarded.len(),
                recounted = report.recounted,
                orphaned = report.orphaned_markers,
                "recovery finished"
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats {
            content_units: self.inner.registry.len(),
            ..LedgerStats::default()
        };
        for repository in self.inner.transactions.repository_ids() {
            let sizes = self.inner.transactions.read(&repository, |s| {
                (s.version_count(), s.building_versions().count(), s.entry_count())
            });
            match sizes {
                Ok((versions, building, entries)) => {
                    stats.repositories += 1;
                    stats.versions += versions;
                    stats.building_versions += building;
                    stats.entries += entries;
                }
                Err(err) => {
                    warn!(repository = %repository, error = %err, "skipping repository in stats")
                }
            }
        }
        stats.complete_versions = stats.versions - stats.building_versions;
        stats
    }

    /// Forget that this process owns `version`, so recovery may discard it.
    pub(crate) fn release(&self, version: &VersionId) {
        self.inner.live.lock().remove(version);
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("transactions", &self.inner.transactions)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

fn validate_repository_name(name: &str) -> LedgerResult<()> {
    use crate::storage::InvalidNameError;

    if name.is_empty() {
        return Err(LedgerError::invalid_name(name, InvalidNameError::Empty));
    }
    if name.len() > RepositoryRecord::MAX_NAME_LENGTH {
        return Err(LedgerError::invalid_name(name, InvalidNameError::TooLong(name.len())));
    }
    if let Some((position, char)) = name.char_indices().find(|(_, c)| c.is_control()) {
        return Err(LedgerError::invalid_name(
            name,
            InvalidNameError::InvalidCharacter { char, position },
        ));
    }
    Ok(())
}

fn state_for<'a>(
    states: &'a mut HashMap<RepositoryId, RepositoryState>,
    repository: &RepositoryId,
    collection: Collection,
    key: &str,
) -> LedgerResult<&'a mut RepositoryState> {
    states.get_mut(repository).ok_or_else(|| {
        StorageError::CorruptedData {
            path: PathBuf::from(format!("{}/{}.json", collection, key)),
            reason: format!("references unknown repository {}", repository),
        }
        .into()
    })
}
