//! Scoped construction of a new version.
//!
//! A [`VersionSession`] owns a building version until it is either finished
//! (finalized) or aborted (deleted). [`Ledger::with_new_version`] wraps the
//! whole lifecycle around a closure.

use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, warn};

use crate::catalog::{RepositoryId, VersionId};
use crate::ledger::{Ledger, LedgerError, LedgerResult};
use crate::version::VersionHandle;

/// A building version that must be finished or aborted.
#[must_use = "a session must be finished or aborted"]
pub struct VersionSession {
    ledger: Ledger,
    handle: VersionHandle,
    closed: bool,
}

impl VersionSession {
    pub fn version(&self) -> &VersionHandle {
        &self.handle
    }

    /// Finalize the version. If that fails the version is deleted and the
    /// finalize error is returned.
    pub fn finish(mut self) -> LedgerResult<VersionHandle> {
        self.closed = true;
        let handle = self.handle.clone();
        match handle.finalize() {
            Ok(_) => Ok(handle),
            Err(err) => {
                discard(handle, &err);
                Err(err)
            }
        }
    }

    /// Delete the half-built version.
    pub fn abort(mut self) -> LedgerResult<()> {
        self.closed = true;
        self.handle.clone().delete().map(|_| ())
    }
}

impl Deref for VersionSession {
    type Target = VersionHandle;

    fn deref(&self) -> &VersionHandle {
        &self.handle
    }
}

impl Drop for VersionSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                repository = %self.handle.repository_id(),
                number = self.handle.number(),
                "version session dropped without finish or abort, leaving it to recovery"
            );
            self.ledger.release(self.handle.id());
        }
    }
}

impl std::fmt::Debug for VersionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSession")
            .field("version", &self.handle)
            .field("closed", &self.closed)
            .finish()
    }
}

fn discard(handle: VersionHandle, cause: &dyn std::fmt::Display) {
    let number = handle.number();
    if let Err(err) = handle.delete() {
        error!(number, error = %err, cause = %cause, "failed to discard version");
    }
}

impl Ledger {
    /// Create a building version wrapped in a session.
    pub fn begin_version(
        &self,
        repository: &RepositoryId,
        base: Option<&VersionId>,
    ) -> LedgerResult<VersionSession> {
        let handle = self.create_version(repository, base)?;
        Ok(VersionSession {
            ledger: self.clone(),
            handle,
            closed: false,
        })
    }

    /// Create a version, run `f` on it and finalize it.
    ///
    /// If `f` fails or panics the version is deleted and the error or panic
    /// is passed on.
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
        let mut session = self.begin_version(repository, base)?;

        match panic::catch_unwind(AssertUnwindSafe(|| f(session.version()))) {
            Ok(Ok(value)) => {
                let handle = session.finish()?;
                Ok((handle, value))
            }
            Ok(Err(err)) => {
                session.closed = true;
                discard(session.handle.clone(), &err);
                Err(err)
            }
            Err(payload) => {
                session.closed = true;
                discard(session.handle.clone(), &"panic while building version");
                panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Collection, ContentId, ContentType};
    use crate::storage::{GitRepository, GitSignature};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Ledger, RepositoryId) {
        let dir = TempDir::new().unwrap();
        let store =
            GitRepository::init(dir.path(), GitSignature::default(), &Collection::all_names()).unwrap();
        let ledger = Ledger::load(store).unwrap();
        let rpm = ContentType::new("rpm").unwrap();
        for id in ["a", "b", "c"] {
            ledger.register_content(ContentId::new(id).unwrap(), rpm.clone()).unwrap();
        }
        let repo = ledger.create_repository("acme", None).unwrap().id;
        (dir, ledger, repo)
    }

    fn cid(name: &str) -> ContentId {
        ContentId::new(name).unwrap()
    }

    #[test]
    fn test_finish_completes_version() {
        let (_dir, ledger, repo) = setup();
        let session = ledger.begin_version(&repo, None).unwrap();
        session.add_content([&cid("a")]).unwrap();
        let version = session.finish().unwrap();

        assert!(version.is_complete().unwrap());
        assert_eq!(ledger.latest(&repo).unwrap(), Some(version));
    }

    #[test]
    fn test_abort_discards_version() {
        let (_dir, ledger, repo) = setup();
        let session = ledger.begin_version(&repo, None).unwrap();
        let id = session.id().clone();
        session.abort().unwrap();

        assert!(ledger.version(&id).unwrap_err().is_not_found());
        assert_eq!(ledger.repository(&repo).unwrap().last_version, 0);
    }

    #[test]
    fn test_with_new_version_error_deletes() {
        let (_dir, ledger, repo) = setup();
        let result: Result<(VersionHandle, ()), LedgerError> =
            ledger.with_new_version(&repo, None, |v| {
                v.add_content([&cid("a")])?;
                v.add_content([&cid("not-registered")])?;
                Ok(())
            });

        assert!(matches!(result, Err(LedgerError::ContentNotFound(_))));
        assert!(ledger.versions(&repo).unwrap().is_empty());
        assert_eq!(ledger.repository(&repo).unwrap().last_version, 0);
    }

    #[test]
    fn test_with_new_version_panic_deletes() {
        let (_dir, ledger, repo) = setup();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = ledger.with_new_version(&repo, None, |v| -> LedgerResult<()> {
                v.add_content([&cid("a")])?;
                panic!("boom");
            });
        }));

        assert!(result.is_err());
        assert!(ledger.versions(&repo).unwrap().is_empty());
    }

    #[test]
    fn test_with_new_version_success() {
        let (_dir, ledger, repo) = setup();
        let (version, added) = ledger
            .with_new_version(&repo, None, |v| v.add_content([&cid("a"), &cid("b")]))
            .map_err(|e: LedgerError| e)
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(version.number(), 1);
        assert!(version.is_complete().unwrap());
        assert_eq!(version.counts().unwrap().len(), 2);
    }

    #[test]
    fn test_dropped_session_is_recovered() {
        let (_dir, ledger, repo) = setup();
        let kept = ledger.begin_version(&repo, None).unwrap();
        {
            let dropped = ledger.begin_version(&repo, None).unwrap();
            dropped.add_content([&cid("b")]).unwrap();
        }

        let report = ledger.recover().unwrap();
        assert_eq!(report.discarded, vec!["acme#2".to_string()]);
        assert_eq!(ledger.versions(&repo).unwrap().len(), 1);
        assert_eq!(ledger.repository(&repo).unwrap().last_version, 1);
        kept.finish().unwrap();
    }
}
