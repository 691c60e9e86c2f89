//! storage layer for repoledger
//!
//! this module provides a record store on top of git. The upper layers
//! (transaction manager, ledger) use this API and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │    (scan / read collections, publish change sets)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │   record    │       │    refs     │
//!  │(collections)│       │   (blobs)   │       │   (main)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use repoledger::storage::{ChangeSet, CollectionName, GitRepository, GitSignature, RecordKey};
//!
//! let versions = CollectionName::new("versions")?;
//! let store = GitRepository::open_or_init("./ledger", GitSignature::default(), &[versions.clone()])?;
//!
//! let mut changes = ChangeSet::new();
//! changes.put(versions.clone(), RecordKey::generate(), &version_record)?;
//! store.apply(&changes, "create version")?;
//!
//! let all: Vec<VersionRecord> = store.scan(&versions)?;
//! ```

mod commit;
mod error;
mod record;
mod refs;
mod repository;
mod tree;
mod types;

pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use record::Record;
pub use repository::{Change, ChangeSet, GitRepository, StorageStats};
pub use types::{
    BlobId, CollectionName, CommitId, GitSignature, InvalidNameError, RecordKey, RecordPath, TreeId,
};

pub(crate) use types::validate_key;
