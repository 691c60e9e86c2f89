//! repoledger - versioned content membership for repositories
//!
//! A repository's content changes over time as a sequence of numbered,
//! immutable versions. Instead of storing a full copy of the content per
//! version, the ledger records when each content unit entered and left the
//! repository, and rebuilds the content of any version from those intervals.
//! Everything is persisted in a Git repository, one commit per transaction.
//!
//! # Example
//!
//! ```no_run
//! use repoledger::catalog::{ContentId, ContentType};
//! use repoledger::db::Database;
//!
//! let db = Database::open("./ledger").unwrap();
//! let rpm = ContentType::new("rpm").unwrap();
//! let a = db.register_content(ContentId::new("a").unwrap(), rpm).unwrap();
//! let repo = db.create_repository("acme", None).unwrap();
//!
//! let v1 = db.create_version(&repo.id, None).unwrap();
//! v1.add_content([&a.id]).unwrap();
//! v1.finalize().unwrap();
//! assert!(v1.contains(&a.id).unwrap());
//! ```

pub mod catalog;
pub mod db;
pub mod ledger;
pub mod storage;
pub mod transaction;
pub mod version;
