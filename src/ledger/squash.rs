//! Version deletion.
//!
//! Deleting a complete version folds its deltas into the next complete
//! version so that every surviving version keeps exactly the content it had.
//! Deleting the latest complete version discards its deltas, and deleting a
//! version that is still building discards it entirely.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::catalog::{ContentId, ContentTypes, EntryId, LedgerEntry, VersionId, VersionRecord};
use crate::ledger::counter::ContentCounter;
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TxActive};

/// What happened to a deleted version's deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum SquashOutcome {
    /// The version was still building and has been discarded.
    Discarded,
    /// The deltas were merged into the next complete version.
    MergedInto(VersionRecord),
    /// The version was the latest complete one; its deltas were dropped.
    DroppedLatest,
}

pub struct SquashEngine;

impl SquashEngine {
    /// Delete `version` inside `tx`, preserving the content of every other version.
    pub fn delete(
        tx: &mut Transaction<TxActive>,
        version: &VersionId,
        types: &dyn ContentTypes,
    ) -> LedgerResult<SquashOutcome> {
        let record = tx
            .state()
            .version(version)
            .cloned()
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))?;

        let outcome = if !record.complete {
            Self::discard_building(tx, &record);
            SquashOutcome::Discarded
        } else {
            match tx.state().next_complete_after(record.number).cloned() {
                Some(successor) => {
                    Self::squash_into(tx, &record, &successor);
                    ContentCounter::compute(tx, &successor.id, types)?;
                    SquashOutcome::MergedInto(successor)
                }
                None => {
                    Self::drop_latest(tx, &record);
                    SquashOutcome::DroppedLatest
                }
            }
        };

        tx.remove_counts(&record.id);
        tx.remove_pending(&record.id);
        tx.remove_version(&record.id);

        info!(
            repository = %tx.state().repository().name,
            number = record.number,
            outcome = %Self::outcome_label(&outcome),
            "deleted version"
        );
        Ok(outcome)
    }

    fn outcome_label(outcome: &SquashOutcome) -> String {
        match outcome {
            SquashOutcome::Discarded => "discarded".to_string(),
            SquashOutcome::MergedInto(successor) => format!("merged into {}", successor.number),
            SquashOutcome::DroppedLatest => "dropped latest".to_string(),
        }
    }

    /// Fold the deltas of `squashed` into `successor`.
    ///
    /// Pairs that cancel out (added by `squashed` and removed by `successor`,
    /// or removed by `squashed` and re-added by `successor`) are resolved
    /// before the remaining deltas are moved forward.
    fn squash_into(
        tx: &mut Transaction<TxActive>,
        squashed: &VersionRecord,
        successor: &VersionRecord,
    ) {
        let s = &squashed.id;
        let t = &successor.id;

        // added and removed within `s` itself: no surviving version sees these
        let transient: Vec<EntryId> = tx
            .state()
            .entries_added_in(s)
            .filter(|e| e.version_removed_id.as_ref() == Some(s))
            .map(|e| e.id.clone())
            .collect();
        for id in &transient {
            tx.remove_entry(id);
        }

        let state = tx.state();
        let cancelled: Vec<EntryId> = state
            .entries_added_in(s)
            .filter(|e| e.version_removed_id.as_ref() == Some(t))
            .map(|e| e.id.clone())
            .collect();

        let added_in_successor: HashMap<ContentId, LedgerEntry> = state
            .entries_added_in(t)
            .filter(|e| e.version_removed_id.as_ref() != Some(t))
            .map(|e| (e.content_id.clone(), e.clone()))
            .collect();

        // removed by `s` and added back by `t`: the earlier entry continues
        // through to wherever the re-added one ended
        let mut rejoined = Vec::new();
        for removal in state.entries_removed_in(s) {
            if let Some(readded) = added_in_successor.get(&removal.content_id) {
                rejoined.push((
                    LedgerEntry {
                        version_removed_id: readded.version_removed_id.clone(),
                        ..removal.clone()
                    },
                    readded.id.clone(),
                ));
            }
        }

        debug!(
            number = squashed.number,
            successor = successor.number,
            transient = transient.len(),
            cancelled = cancelled.len(),
            rejoined = rejoined.len(),
            "squashing version"
        );

        for id in &cancelled {
            tx.remove_entry(id);
        }
        for (extended, readded) in rejoined {
            tx.remove_entry(&readded);
            tx.put_entry(extended);
        }

        let state = tx.state();
        let forwarded_adds: Vec<LedgerEntry> = state
            .entries_added_in(s)
            .map(|e| LedgerEntry {
                version_added_id: t.clone(),
                ..e.clone()
            })
            .collect();
        let forwarded_removals: Vec<LedgerEntry> = state
            .entries_removed_in(s)
            .map(|e| LedgerEntry {
                version_removed_id: Some(t.clone()),
                ..e.clone()
            })
            .collect();

        for entry in forwarded_adds.into_iter().chain(forwarded_removals) {
            tx.put_entry(entry);
        }
    }

    /// Drop the deltas of the latest complete version.
    fn drop_latest(tx: &mut Transaction<TxActive>, version: &VersionRecord) {
        Self::drop_deltas(tx, &version.id);
    }

    /// Drop a building version's deltas and give back its number if it was
    /// the last one assigned.
    fn discard_building(tx: &mut Transaction<TxActive>, version: &VersionRecord) {
        Self::drop_deltas(tx, &version.id);

        let mut repository = tx.state().repository().clone();
        if repository.last_version == version.number {
            repository.last_version = version.number.saturating_sub(1);
            tx.set_repository(repository);
        }
    }

    fn drop_deltas(tx: &mut Transaction<TxActive>, version: &VersionId) {
        let state = tx.state();
        let added: Vec<EntryId> = state.entries_added_in(version).map(|e| e.id.clone()).collect();
        let reopened: Vec<LedgerEntry> = state
            .entries_removed_in(version)
            .filter(|e| &e.version_added_id != version)
            .map(|e| LedgerEntry {
                version_removed_id: None,
                ..e.clone()
            })
            .collect();

        for id in &added {
            tx.remove_entry(id);
        }
        for entry in reopened {
            tx.put_entry(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::catalog::{
        Collection, ContentType, CountType, RepositoryId, RepositoryRecord, RepositoryState,
    };
    use crate::ledger::membership::MembershipLedger;
    use crate::storage::{GitRepository, GitSignature};
    use crate::transaction::TransactionManager;
    use tempfile::TempDir;

    struct AllFiles;

    impl ContentTypes for AllFiles {
        fn content_type(&self, _id: &ContentId) -> Option<ContentType> {
            ContentType::new("file").ok()
        }
    }

    fn ids(names: &[&str]) -> BTreeSet<ContentId> {
        names.iter().map(|n| ContentId::new(*n).unwrap()).collect()
    }

    struct Fixture {
        _dir: TempDir,
        manager: TransactionManager,
        repo: RepositoryId,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store =
                GitRepository::init(dir.path(), GitSignature::default(), &Collection::all_names())
                    .unwrap();
            let manager = TransactionManager::new(store);
            let state = RepositoryState::new(RepositoryRecord::new("acme", None));
            let repo = state.id().clone();
            manager.install(state);
            Self {
                _dir: dir,
                manager,
                repo,
            }
        }

        /// Create a version, apply removals then additions, and complete it.
        fn version(&self, remove: &[&str], add: &[&str]) -> VersionId {
            self.building(remove, add, true)
        }

        fn building(&self, remove: &[&str], add: &[&str], complete: bool) -> VersionId {
            self.manager
                .with_transaction(&self.repo, "version", |tx| {
                    let mut repository = tx.state().repository().clone();
                    repository.last_version += 1;
                    let version = VersionRecord::new(self.repo.clone(), repository.last_version, None);
                    let id = version.id.clone();
                    tx.set_repository(repository);
                    tx.put_version(version.clone());
                    MembershipLedger::remove_content(tx, &id, &ids(remove))?;
                    MembershipLedger::add_content(tx, &id, &ids(add))?;
                    if complete {
                        tx.put_version(VersionRecord {
                            complete: true,
                            ..version
                        });
                    }
                    Ok::<_, LedgerError>(id)
                })
                .unwrap()
        }

        /// Create a complete version that adds `names` and then removes them again.
        fn transient(&self, names: &[&str]) -> VersionId {
            let id = self.building(&[], names, false);
            self.manager
                .with_transaction(&self.repo, "transient", |tx| {
                    MembershipLedger::remove_content(tx, &id, &ids(names))?;
                    let record = tx.state().version(&id).cloned().unwrap();
                    tx.put_version(VersionRecord {
                        complete: true,
                        ..record
                    });
                    Ok::<_, LedgerError>(())
                })
                .unwrap();
            id
        }

        fn entries_of(&self, name: &str) -> usize {
            self.manager
                .read(&self.repo, |s| s.entries_for_content(&ContentId::new(name).unwrap()).count())
                .unwrap()
        }

        fn delete(&self, version: &VersionId) -> SquashOutcome {
            self.manager
                .with_transaction(&self.repo, "delete", |tx| {
                    SquashEngine::delete(tx, version, &AllFiles)
                })
                .unwrap()
        }

        fn content(&self, version: &VersionId) -> BTreeSet<ContentId> {
            self.manager
                .read(&self.repo, |s| {
                    MembershipLedger::content_at(s, s.number_of(version).unwrap())
                })
                .unwrap()
        }

        fn exists(&self, version: &VersionId) -> bool {
            self.manager
                .read(&self.repo, |s| s.version(version).is_some())
                .unwrap()
        }
    }

    #[test]
    fn test_squash_into_successor_preserves_content() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a", "b"]);
        let v2 = f.version(&["a"], &["c"]);

        let outcome = f.delete(&v1);
        assert!(matches!(outcome, SquashOutcome::MergedInto(ref s) if s.id == v2));
        assert!(!f.exists(&v1));
        assert_eq!(f.content(&v2), ids(&["b", "c"]));

        let (added, removed) = f
            .manager
            .read(&f.repo, |s| {
                (
                    MembershipLedger::added_in(s, &v2),
                    MembershipLedger::removed_in(s, &v2),
                )
            })
            .unwrap();
        assert_eq!(added, ids(&["b", "c"]));
        assert!(removed.is_empty());
    }

    #[test]
    fn test_delete_latest_reverts_to_previous() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a", "b"]);
        let v2 = f.version(&["a"], &["c"]);

        assert_eq!(f.delete(&v2), SquashOutcome::DroppedLatest);
        assert_eq!(f.content(&v1), ids(&["a", "b"]));
        let open = f
            .manager
            .read(&f.repo, |s| MembershipLedger::content_at(s, u64::MAX))
            .unwrap();
        assert_eq!(open, ids(&["a", "b"]));
    }

    #[test]
    fn test_removed_then_readded_chain() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.version(&["a"], &[]);
        let v3 = f.version(&[], &["a"]);
        let v4 = f.version(&["a"], &["b"]);

        f.delete(&v2);
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.content(&v3), ids(&["a"]));
        assert_eq!(f.content(&v4), ids(&["b"]));

        f.delete(&v3);
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.content(&v4), ids(&["b"]));
        assert_eq!(f.manager.read(&f.repo, |s| s.entry_count()).unwrap(), 2);
    }

    #[test]
    fn test_added_then_removed_by_successor_cancels() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.version(&[], &["b"]);
        let v3 = f.version(&["b"], &["c"]);

        f.delete(&v2);
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.content(&v3), ids(&["a", "c"]));
        let b_entries = f
            .manager
            .read(&f.repo, |s| s.entries_for_content(&ContentId::new("b").unwrap()).count())
            .unwrap();
        assert_eq!(b_entries, 0);
    }

    #[test]
    fn test_squash_drops_same_version_interval() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.transient(&["b"]);
        let v3 = f.version(&[], &["c"]);
        assert_eq!(f.entries_of("b"), 1);

        let outcome = f.delete(&v2);
        assert!(matches!(outcome, SquashOutcome::MergedInto(ref s) if s.id == v3));
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.content(&v3), ids(&["a", "c"]));
        assert_eq!(f.entries_of("b"), 0);
        let (added, removed) = f
            .manager
            .read(&f.repo, |s| {
                (
                    MembershipLedger::added_in(s, &v3),
                    MembershipLedger::removed_in(s, &v3),
                )
            })
            .unwrap();
        assert_eq!(added, ids(&["c"]));
        assert!(removed.is_empty());
    }

    #[test]
    fn test_drop_latest_does_not_reopen_same_version_interval() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.transient(&["b"]);

        assert_eq!(f.delete(&v2), SquashOutcome::DroppedLatest);
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.entries_of("b"), 0);
        let open = f
            .manager
            .read(&f.repo, |s| MembershipLedger::content_at(s, u64::MAX))
            .unwrap();
        assert_eq!(open, ids(&["a"]));
    }

    #[test]
    fn test_squash_readded_in_same_version() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.version(&["a"], &["a"]);
        let v3 = f.version(&["a"], &["b"]);
        assert_eq!(f.entries_of("a"), 2);

        f.delete(&v2);
        assert_eq!(f.content(&v1), ids(&["a"]));
        assert_eq!(f.content(&v3), ids(&["b"]));
        // [v1, v2) and [v2, v3) become a single [v1, v3)
        assert_eq!(f.entries_of("a"), 1);
        let removed = f
            .manager
            .read(&f.repo, |s| MembershipLedger::removed_in(s, &v3))
            .unwrap();
        assert_eq!(removed, ids(&["a"]));
    }

    #[test]
    fn test_squash_skips_building_versions() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let building = f.building(&[], &["x"], false);
        let v3 = f.version(&[], &["b"]);

        let outcome = f.delete(&v1);
        assert!(matches!(outcome, SquashOutcome::MergedInto(ref s) if s.id == v3));
        assert!(f.exists(&building));
        assert_eq!(f.content(&v3), ids(&["a", "b", "x"]));
    }

    #[test]
    fn test_discard_building_rolls_back_counter() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a"]);
        let v2 = f.building(&["a"], &["b"], false);

        assert_eq!(f.delete(&v2), SquashOutcome::Discarded);
        assert_eq!(f.content(&v1), ids(&["a"]));
        let last = f
            .manager
            .read(&f.repo, |s| s.repository().last_version)
            .unwrap();
        assert_eq!(last, 1);
    }

    #[test]
    fn test_successor_counts_recomputed() {
        let f = Fixture::new();
        let v1 = f.version(&[], &["a", "b"]);
        let v2 = f.version(&[], &["c"]);
        f.delete(&v1);

        let counts = f
            .manager
            .read(&f.repo, |s| s.counts(&v2).cloned())
            .unwrap()
            .unwrap();
        let added = counts
            .summaries
            .iter()
            .find(|c| c.count_type == CountType::Added)
            .map(|c| c.count);
        assert_eq!(added, Some(3));
    }

    #[test]
    fn test_missing_version() {
        let f = Fixture::new();
        let result: LedgerResult<SquashOutcome> =
            f.manager.with_transaction(&f.repo, "delete", |tx| {
                SquashEngine::delete(tx, &VersionId::generate(), &AllFiles)
            });
        assert!(matches!(result, Err(LedgerError::VersionNotFound(_))));
    }
}
