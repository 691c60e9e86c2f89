//! Database API - high-level interface for repoledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;
use tracing::info;

use crate::catalog::{
    Collection, ContentId, ContentType, ContentUnit, CountSummary, RepositoryId, RepositoryRecord,
    VersionId, VersionRecord,
};
use crate::ledger::{Ledger, LedgerError, LedgerStats, RecoveryReport, SquashOutcome};
use crate::storage::{CommitInfo, GitRepository, GitSignature, StorageError};
use crate::version::{VersionHandle, VersionSession};

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid command: {0}")]
    Command(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// The ledger error behind this one, if any.
    pub fn ledger(&self) -> Option<&LedgerError> {
        match self {
            DatabaseError::Ledger(err) => Some(err),
            _ => None,
        }
    }
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Create if doesn't exist.
    pub create_if_missing: bool,
    /// Discard abandoned versions and repair counts when opening.
    pub recover_on_open: bool,
    /// Enable verbose output.
    pub verbose: bool,
    /// Author and committer of every commit.
    pub signature: GitSignature,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".repoledger"),
            create_if_missing: true,
            recover_on_open: true,
            verbose: false,
            signature: GitSignature::default(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn recover_on_open(mut self, value: bool) -> Self {
        self.recover_on_open = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn signature(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.signature = GitSignature::new(name, email);
        self
    }

    fn validate(&self) -> DatabaseResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(DatabaseError::InvalidConfig("database path is empty".into()));
        }
        if self.signature.name.trim().is_empty() || self.signature.email.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "commit signature needs a name and an email".into(),
            ));
        }
        Ok(())
    }
}

/// The main database handle. Cheap to clone; clones share the ledger.
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    ledger: Ledger,
    /// Keeps the directory of an in-memory database alive.
    _temp: Option<Arc<TempDir>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Open or create a database with custom configuration.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate()?;

        let collections = Collection::all_names();
        let store = if config.create_if_missing {
            GitRepository::open_or_init(&config.path, config.signature.clone(), &collections)?
        } else if config.path.join(".git").exists() {
            GitRepository::open(&config.path, config.signature.clone())?
        } else {
            return Err(DatabaseError::NotFound(config.path.clone()));
        };

        let ledger = Ledger::load(store)?;
        if config.recover_on_open {
            let report = ledger.recover()?;
            if !report.is_clean() {
                info!(path = %config.path.display(), ?report, "recovered ledger on open");
            }
        }

        Ok(Self {
            config,
            ledger,
            _temp: None,
        })
    }

    /// Create a database in a temporary directory that lives as long as the handle.
    pub fn in_memory() -> DatabaseResult<Self> {
        let dir = TempDir::new()?;
        let mut db = Self::open(dir.path())?;
        db._temp = Some(Arc::new(dir));
        Ok(db)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // ==================== Repositories ====================

    pub fn create_repository(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> DatabaseResult<RepositoryRecord> {
        Ok(self.ledger.create_repository(name, description)?)
    }

    pub fn repository(&self, id: &RepositoryId) -> DatabaseResult<RepositoryRecord> {
        Ok(self.ledger.repository(id)?)
    }

    pub fn repository_by_name(&self, name: &str) -> DatabaseResult<RepositoryRecord> {
        Ok(self.ledger.repository_by_name(name)?)
    }

    pub fn list_repositories(&self) -> Vec<RepositoryRecord> {
        self.ledger.list_repositories()
    }

    // ==================== Content ====================

    pub fn register_content(
        &self,
        id: ContentId,
        content_type: ContentType,
    ) -> DatabaseResult<ContentUnit> {
        Ok(self.ledger.register_content(id, content_type)?)
    }

    pub fn content_unit(&self, id: &ContentId) -> Option<ContentUnit> {
        self.ledger.content_unit(id)
    }

    // ==================== Versions ====================

    pub fn create_version(
        &self,
        repository: &RepositoryId,
        base: Option<&VersionId>,
    ) -> DatabaseResult<VersionHandle> {
        Ok(self.ledger.create_version(repository, base)?)
    }

    pub fn begin_version(
        &self,
        repository: &RepositoryId,
        base: Option<&VersionId>,
    ) -> DatabaseResult<VersionSession> {
        Ok(self.ledger.begin_version(repository, base)?)
    }

    /// Build a version with `f`, finalizing it on success and deleting it
    /// on error or panic.
    pub fn with_new_version<F, T, E>(
        &self,
        repository: &RepositoryId,
        base: Option<&VersionId>,
        f: F,
    ) -> Result<(VersionHandle, T), E>
    where
        F: FnOnce(&VersionHandle) -> Result<T, E>,
        E: From<LedgerError> + std::fmt::Display,
    {
        self.ledger.with_new_version(repository, base, f)
    }

    pub fn version(&self, id: &VersionId) -> DatabaseResult<VersionHandle> {
        Ok(self.ledger.version(id)?)
    }

    pub fn version_by_number(
        &self,
        repository: &RepositoryId,
        number: u64,
    ) -> DatabaseResult<VersionHandle> {
        Ok(self.ledger.version_by_number(repository, number)?)
    }

    pub fn versions(&self, repository: &RepositoryId) -> DatabaseResult<Vec<VersionRecord>> {
        Ok(self.ledger.versions(repository)?)
    }

    pub fn latest(&self, repository: &RepositoryId) -> DatabaseResult<Option<VersionHandle>> {
        Ok(self.ledger.latest(repository)?)
    }

    pub fn next(&self, version: &VersionId) -> DatabaseResult<Option<VersionHandle>> {
        Ok(self.ledger.next(version)?)
    }

    pub fn delete_version(&self, version: &VersionId) -> DatabaseResult<SquashOutcome> {
        Ok(self.ledger.delete_version(version)?)
    }

    pub fn counts(&self, version: &VersionId) -> DatabaseResult<Vec<CountSummary>> {
        Ok(self.ledger.counts(version)?)
    }

    pub fn recompute_counts(&self, version: &VersionId) -> DatabaseResult<Vec<CountSummary>> {
        Ok(self.ledger.recompute_counts(version)?)
    }

    // ==================== Maintenance ====================

    pub fn recover(&self) -> DatabaseResult<RecoveryReport> {
        Ok(self.ledger.recover()?)
    }

    /// Get the commit history, newest first. Every transaction is one commit.
    pub fn history(&self, limit: Option<usize>) -> DatabaseResult<Vec<CommitInfo>> {
        Ok(self.ledger.store().history(limit)?)
    }

    /// Get database statistics.
    pub fn stats(&self) -> DatabaseResult<DatabaseStats> {
        let storage = self.ledger.store().stats()?;
        Ok(DatabaseStats {
            ledger: self.ledger.stats(),
            commits: storage.commits,
            active_transactions: self.ledger.transactions().active_count(),
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.path)
            .field("ledger", &self.ledger)
            .finish()
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub ledger: LedgerStats,
    /// Number of commits on `main`.
    pub commits: usize,
    /// Number of active transactions.
    pub active_transactions: usize,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.ledger)?;
        writeln!(f, "commits:       {}", self.commits)?;
        write!(f, "transactions:  {}", self.active_transactions)
    }
}
