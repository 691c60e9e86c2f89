//! Identifiers and persisted records of the ledger.
//!
//! Every record type here is stored as one JSON blob in its collection, keyed
//! by its identifier. The in-memory indexes in [`super::state`] are rebuilt
//! from these records when a store is opened.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::storage::{validate_key, CollectionName, InvalidNameError, RecordKey};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered identifier.
            pub fn generate() -> Self {
                Self(Ulid::new().to_string().to_lowercase())
            }

            /// Parse an identifier previously produced by [`Self::generate`].
            pub fn parse(value: &str) -> Result<Self, InvalidNameError> {
                let lowered = value.to_lowercase();
                Ulid::from_string(&lowered)
                    .map_err(|_| InvalidNameError::InvalidPath(value.to_string()))?;
                Ok(Self(lowered))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub(crate) fn record_key(&self) -> RecordKey {
                RecordKey::new_unchecked(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

ulid_id!(
    /// Identifier of a repository.
    RepositoryId
);
ulid_id!(
    /// Identifier of a repository version.
    VersionId
);
ulid_id!(
    /// Identifier of a membership ledger entry.
    EntryId
);

/// Identifier of a content unit.
///
/// Content ids are chosen by the caller (package checksums, file digests) so
/// they are validated with the same rules as record keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        validate_key(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn record_key(&self) -> RecordKey {
        RecordKey::new_unchecked(&self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The kind of a content unit, e.g. `rpm.package` or `file.file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub const MAX_LENGTH: usize = 128;

    /// Lowercase letters, digits, `_`, `-` and `.`; starting with a letter.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();

        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if let Some(first) = name.chars().next().filter(|c| !c.is_ascii_lowercase()) {
            return Err(InvalidNameError::InvalidStart(first));
        }
        if let Some((position, char)) = name.char_indices().find(|(_, c)| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
        }) {
            return Err(InvalidNameError::InvalidCharacter { char, position });
        }

        Ok(Self(name))
    }

    /// Placeholder for ledger content whose registration record is missing.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The collections that make up a ledger store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Repositories,
    Versions,
    LedgerEntries,
    CountSummaries,
    PendingVersions,
    Content,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Repositories,
        Collection::Versions,
        Collection::LedgerEntries,
        Collection::CountSummaries,
        Collection::PendingVersions,
        Collection::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Repositories => "repositories",
            Collection::Versions => "versions",
            Collection::LedgerEntries => "ledger_entries",
            Collection::CountSummaries => "count_summaries",
            Collection::PendingVersions => "pending_versions",
            Collection::Content => "content",
        }
    }

    pub fn name(&self) -> CollectionName {
        CollectionName::new_unchecked(self.as_str())
    }

    pub fn all_names() -> Vec<CollectionName> {
        Self::ALL.iter().map(Collection::name).collect()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named container of content whose history is a sequence of versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepositoryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Highest version number assigned so far, 0 before the first version.
    pub last_version: u64,
    pub created_at: DateTime<Utc>,
}

impl RepositoryRecord {
    pub const MAX_NAME_LENGTH: usize = 255;

    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: RepositoryId::generate(),
            name: name.into(),
            description,
            last_version: 0,
            created_at: Utc::now(),
        }
    }
}

/// One numbered snapshot of a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    pub repository_id: RepositoryId,
    pub number: u64,
    /// Once true the version's content is frozen.
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(repository_id: RepositoryId, number: u64, base_version_id: Option<VersionId>) -> Self {
        Self {
            id: VersionId::generate(),
            repository_id,
            number,
            complete: false,
            base_version_id,
            created_at: Utc::now(),
        }
    }

    pub fn state_label(&self) -> &'static str {
        if self.complete {
            "complete"
        } else {
            "building"
        }
    }
}

/// Membership of one content unit over a half-open range of version numbers,
/// from the number of `version_added_id` up to, not including, the number of
/// `version_removed_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub repository_id: RepositoryId,
    pub content_id: ContentId,
    pub version_added_id: VersionId,
    #[serde(default)]
    pub version_removed_id: Option<VersionId>,
}

impl LedgerEntry {
    pub fn open(repository_id: RepositoryId, content_id: ContentId, added: VersionId) -> Self {
        Self {
            id: EntryId::generate(),
            repository_id,
            content_id,
            version_added_id: added,
            version_removed_id: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.version_removed_id.is_none()
    }
}

/// Which delta or snapshot a count summary describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CountType {
    #[serde(rename = "A")]
    Added,
    #[serde(rename = "P")]
    Present,
    #[serde(rename = "R")]
    Removed,
}

impl CountType {
    pub fn code(&self) -> char {
        match self {
            CountType::Added => 'A',
            CountType::Present => 'P',
            CountType::Removed => 'R',
        }
    }
}

impl fmt::Display for CountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CountType::Added => "added",
            CountType::Present => "present",
            CountType::Removed => "removed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSummary {
    pub version_id: VersionId,
    pub count_type: CountType,
    pub content_type: ContentType,
    pub count: u64,
}

impl fmt::Display for CountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {:<24} {}", self.count_type, self.content_type, self.count)
    }
}

/// All count summaries of one version, stored as a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRecord {
    pub version_id: VersionId,
    pub repository_id: RepositoryId,
    pub summaries: Vec<CountSummary>,
    pub computed_at: DateTime<Utc>,
}

/// Marker for a version that was created but not yet finalized.
///
/// Versions left behind by a crash keep their marker and are discarded by
/// recovery on the next open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingVersion {
    pub version_id: VersionId,
    pub repository_id: RepositoryId,
    pub created_at: DateTime<Utc>,
}

/// A registered content unit. Only its identity and type matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: ContentId,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
}

impl ContentUnit {
    pub fn new(id: ContentId, content_type: ContentType) -> Self {
        Self {
            id,
            content_type,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_parse_back() {
        let id = VersionId::generate();
        let parsed: VersionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.record_key().as_str(), id.as_str());

        assert!(RepositoryId::parse("not-a-ulid").is_err());
    }

    #[test]
    fn test_content_id_rules() {
        assert!(ContentId::new("sha256-abc123").is_ok());
        assert!(ContentId::new("pkg.1.0.rpm").is_ok());
        assert!(ContentId::new("").is_err());
        assert!(ContentId::new("a/b").is_err());
        assert!(ContentId::new(".hidden").is_err());
    }

    #[test]
    fn test_content_type_rules() {
        assert!(ContentType::new("rpm.package").is_ok());
        assert!(ContentType::new("file").is_ok());
        assert!(ContentType::new("RPM").is_err());
        assert!(ContentType::new("1file").is_err());
        assert!(ContentType::new("a b").is_err());
    }

    #[test]
    fn test_collection_names() {
        let names = Collection::all_names();
        assert_eq!(names.len(), 6);
        assert_eq!(Collection::LedgerEntries.name().as_str(), "ledger_entries");
    }

    #[test]
    fn test_count_type_wire_format() {
        let json = serde_json::to_string(&CountType::Present).unwrap();
        assert_eq!(json, "\"P\"");
        let back: CountType = serde_json::from_str("\"R\"").unwrap();
        assert_eq!(back, CountType::Removed);
        assert_eq!(CountType::Added.code(), 'A');
    }

    #[test]
    fn test_new_version_is_building() {
        let repo = RepositoryRecord::new("acme", None);
        let version = VersionRecord::new(repo.id.clone(), 1, None);
        assert!(!version.complete);
        assert_eq!(version.state_label(), "building");
        assert_eq!(repo.last_version, 0);
    }
}
