//! Reference management.
//!
//! The store keeps a single branch, `main`. Writers move it with
//! compare-and-swap so a commit built on a stale head is never published.

use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::CommitId;

/// Manages the `main` reference.
pub struct RefManager;

impl RefManager {
    pub const MAIN: &'static str = "main";

    fn main_ref_path() -> String {
        format!("refs/heads/{}", Self::MAIN)
    }

    /// Resolve `main` to its current commit ID.
    pub fn resolve_main(repo: &Repository) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&Self::main_ref_path())
            .map_err(|_| StorageError::RefNotFound(Self::MAIN.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(Self::MAIN.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Get the current HEAD commit.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = repo.head().map_err(|e| {
            if e.code() == git2::ErrorCode::UnbornBranch {
                StorageError::EmptyRepository
            } else {
                StorageError::Git(e)
            }
        })?;

        let commit = head.peel_to_commit()?;
        Ok(CommitId::new(commit.id()))
    }

    /// Move `main` only if it still points to `expected`.
    pub fn update_main_if_unchanged(
        repo: &Repository,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::resolve_main(repo)?;
        if current != expected {
            return Err(StorageError::ConcurrentModification {
                branch: Self::MAIN.to_string(),
            });
        }

        let mut reference = repo.find_reference(&Self::main_ref_path())?;
        reference.set_target(new_target.raw(), &format!("ledger commit {}", new_target.short()))?;
        Ok(())
    }

    /// Create `main` at the initial commit and point HEAD at it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        if repo.find_reference(&Self::main_ref_path()).is_err() {
            let commit = repo.find_commit(initial_commit.raw())?;
            repo.branch(Self::MAIN, &commit, false)?;
        }

        repo.set_head(&Self::main_ref_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::{create_initial_commit, CommitBuilder};
    use crate::storage::tree::create_initial_tree;
    use crate::storage::types::GitSignature;
    use tempfile::TempDir;

    fn setup_repo_with_commit() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let commit_id = create_initial_commit(&repo, &GitSignature::repoledger(), &[]).unwrap();
        RefManager::init_main_branch(&repo, commit_id).unwrap();
        (dir, repo, commit_id)
    }

    #[test]
    fn test_head_is_main() {
        let (_dir, repo, expected) = setup_repo_with_commit();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), expected);
        assert_eq!(RefManager::resolve_main(&repo).unwrap(), expected);
    }

    #[test]
    fn test_update_main_if_unchanged() {
        let (_dir, repo, commit1) = setup_repo_with_commit();

        let tree_id = create_initial_tree(&repo, &[]).unwrap();
        let commit2 = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(commit1)
            .message("second")
            .commit()
            .unwrap();

        RefManager::update_main_if_unchanged(&repo, commit1, commit2).unwrap();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), commit2);

        // stale expectation
        let result = RefManager::update_main_if_unchanged(&repo, commit1, commit2);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_empty_repository() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(matches!(
            RefManager::head_commit(&repo),
            Err(StorageError::EmptyRepository)
        ));
    }
}
