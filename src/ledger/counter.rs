//! Per-type content counts of a version.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, warn};

use crate::catalog::{
    ContentId, ContentType, ContentTypes, CountRecord, CountSummary, CountType, RepositoryState,
    VersionId,
};
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::membership::MembershipLedger;
use crate::transaction::{Transaction, TxActive};

pub struct ContentCounter;

impl ContentCounter {
    /// Count the added, present and removed content of `version` by type.
    ///
    /// Types with no content are omitted. Summaries come out ordered by
    /// count type, then content type.
    pub fn summarize(
        state: &RepositoryState,
        version: &VersionId,
        types: &dyn ContentTypes,
    ) -> LedgerResult<Vec<CountSummary>> {
        let record = state
            .version(version)
            .ok_or_else(|| LedgerError::VersionNotFound(version.to_string()))?;

        let sets = [
            (CountType::Added, MembershipLedger::added_in(state, version)),
            (CountType::Present, MembershipLedger::content_at(state, record.number)),
            (CountType::Removed, MembershipLedger::removed_in(state, version)),
        ];

        let mut summaries = Vec::new();
        for (count_type, content) in sets {
            for (content_type, count) in Self::group(&content, types) {
                summaries.push(CountSummary {
                    version_id: version.clone(),
                    count_type,
                    content_type,
                    count,
                });
            }
        }
        Ok(summaries)
    }

    fn group(content: &BTreeSet<ContentId>, types: &dyn ContentTypes) -> BTreeMap<ContentType, u64> {
        let mut groups = BTreeMap::new();
        for id in content {
            let content_type = types.content_type(id).unwrap_or_else(|| {
                warn!(content = %id, "content has no registration, counting as unknown");
                ContentType::unknown()
            });
            *groups.entry(content_type).or_insert(0) += 1;
        }
        groups
    }

    /// Replace the stored counts of `version` within `tx`.
    pub fn compute(
        tx: &mut Transaction<TxActive>,
        version: &VersionId,
        types: &dyn ContentTypes,
    ) -> LedgerResult<Vec<CountSummary>> {
        let summaries = Self::summarize(tx.state(), version, types)?;
        debug!(
            repository = %tx.state().repository().name,
            version = %version,
            count = summaries.len(),
            "computed content counts"
        );

        tx.put_counts(CountRecord {
            version_id: version.clone(),
            repository_id: tx.repository_id().clone(),
            summaries: summaries.clone(),
            computed_at: Utc::now(),
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::catalog::{LedgerEntry, RepositoryRecord, VersionRecord};

    struct FixedTypes(HashMap<ContentId, ContentType>);

    impl ContentTypes for FixedTypes {
        fn content_type(&self, id: &ContentId) -> Option<ContentType> {
            self.0.get(id).cloned()
        }
    }

    fn cid(name: &str) -> ContentId {
        ContentId::new(name).unwrap()
    }

    #[test]
    fn test_summaries_grouped_by_type() {
        let mut state = RepositoryState::new(RepositoryRecord::new("acme", None));
        let repo = state.id().clone();
        let mut v1 = VersionRecord::new(repo.clone(), 1, None);
        v1.complete = true;
        let v2 = VersionRecord::new(repo.clone(), 2, None);
        state.put_version(v1.clone());
        state.put_version(v2.clone());

        let mut removed = LedgerEntry::open(repo.clone(), cid("a"), v1.id.clone());
        removed.version_removed_id = Some(v2.id.clone());
        state.put_entry(removed);
        state.put_entry(LedgerEntry::open(repo.clone(), cid("b"), v1.id.clone()));
        state.put_entry(LedgerEntry::open(repo.clone(), cid("c"), v2.id.clone()));
        state.put_entry(LedgerEntry::open(repo, cid("d"), v2.id.clone()));

        let rpm = ContentType::new("rpm").unwrap();
        let file = ContentType::new("file").unwrap();
        let types = FixedTypes(HashMap::from([
            (cid("a"), rpm.clone()),
            (cid("b"), rpm.clone()),
            (cid("c"), file.clone()),
        ]));

        let summaries = ContentCounter::summarize(&state, &v2.id, &types).unwrap();
        let flat: Vec<(CountType, String, u64)> = summaries
            .iter()
            .map(|s| (s.count_type, s.content_type.to_string(), s.count))
            .collect();

        assert_eq!(
            flat,
            vec![
                (CountType::Added, "file".to_string(), 1),
                (CountType::Added, "unknown".to_string(), 1),
                (CountType::Present, "file".to_string(), 1),
                (CountType::Present, "rpm".to_string(), 1),
                (CountType::Present, "unknown".to_string(), 1),
                (CountType::Removed, "rpm".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_unknown_version() {
        let state = RepositoryState::new(RepositoryRecord::new("acme", None));
        let types = FixedTypes(HashMap::new());
        let result = ContentCounter::summarize(&state, &VersionId::generate(), &types);
        assert!(matches!(result, Err(LedgerError::VersionNotFound(_))));
    }
}
