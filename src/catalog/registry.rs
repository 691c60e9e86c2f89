//! Registry of content units.
//!
//! Content units are shared by all repositories. The ledger only needs their
//! identity and type, the latter for count summaries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::types::{Collection, ContentId, ContentType, ContentUnit};
use crate::storage::{GitRepository, StorageResult};

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created(ContentUnit),
    Existing(ContentUnit),
    /// The id is already registered with a different type.
    Conflict(ContentUnit),
}

/// Looks up the type of a content unit.
pub trait ContentTypes {
    fn content_type(&self, id: &ContentId) -> Option<ContentType>;
}

/// Thread-safe content registry backed by the `content` collection.
#[derive(Clone)]
pub struct ContentRegistry {
    store: GitRepository,
    units: Arc<RwLock<HashMap<ContentId, ContentUnit>>>,
}

impl ContentRegistry {
    pub fn new(store: GitRepository) -> Self {
        Self {
            store,
            units: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build the registry from the units already persisted in `store`.
    pub fn load(store: GitRepository) -> StorageResult<Self> {
        let units: Vec<ContentUnit> = store.scan(&Collection::Content.name())?;
        let registry = Self::new(store);
        {
            let mut map = registry.units.write();
            for unit in units {
                map.insert(unit.id.clone(), unit);
            }
        }
        Ok(registry)
    }

    /// Register `id` with `content_type`, persisting new units immediately.
    pub fn register(&self, id: ContentId, content_type: ContentType) -> StorageResult<Registration> {
        let mut units = self.units.write();

        if let Some(existing) = units.get(&id) {
            return Ok(if existing.content_type == content_type {
                Registration::Existing(existing.clone())
            } else {
                Registration::Conflict(existing.clone())
            });
        }

        let unit = ContentUnit::new(id, content_type);
        self.store
            .put_record(&Collection::Content.name(), &unit.id.record_key(), &unit)?;
        debug!(content = %unit.id, content_type = %unit.content_type, "registered content");

        units.insert(unit.id.clone(), unit.clone());
        Ok(Registration::Created(unit))
    }

    pub fn get(&self, id: &ContentId) -> Option<ContentUnit> {
        self.units.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.units.read().contains_key(id)
    }

    /// The first id in `ids` that is not registered, if any.
    pub fn first_unknown<'a>(&self, ids: impl IntoIterator<Item = &'a ContentId>) -> Option<ContentId> {
        let units = self.units.read();
        ids.into_iter().find(|id| !units.contains_key(*id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}

impl ContentTypes for ContentRegistry {
    fn content_type(&self, id: &ContentId) -> Option<ContentType> {
        self.units.read().get(id).map(|u| u.content_type.clone())
    }
}

impl std::fmt::Debug for ContentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentRegistry")
            .field("units", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GitSignature;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let store =
            GitRepository::init(dir.path(), GitSignature::default(), &Collection::all_names()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (_dir, store) = setup();
        let registry = ContentRegistry::new(store);
        let id = ContentId::new("pkg-a").unwrap();
        let rpm = ContentType::new("rpm.package").unwrap();

        assert!(matches!(
            registry.register(id.clone(), rpm.clone()).unwrap(),
            Registration::Created(_)
        ));
        assert!(matches!(
            registry.register(id.clone(), rpm).unwrap(),
            Registration::Existing(_)
        ));
        assert!(matches!(
            registry.register(id, ContentType::new("file").unwrap()).unwrap(),
            Registration::Conflict(_)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_restores_units() {
        let (_dir, store) = setup();
        let registry = ContentRegistry::new(store.clone());
        let id = ContentId::new("pkg-a").unwrap();
        registry
            .register(id.clone(), ContentType::new("rpm.package").unwrap())
            .unwrap();

        let reloaded = ContentRegistry::load(store).unwrap();
        assert_eq!(
            reloaded.content_type(&id).map(|t| t.as_str().to_string()),
            Some("rpm.package".to_string())
        );
        let unknown = ContentId::new("pkg-b").unwrap();
        assert_eq!(reloaded.first_unknown([&id, &unknown]), Some(unknown));
    }
}
