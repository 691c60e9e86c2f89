//! Transaction management for repoledger.
//!
//! Every ledger operation runs inside a transaction scoped to one
//! repository. The transaction holds that repository's state lock, applies
//! mutations in memory as it goes, and publishes all touched records as a
//! single commit on `main`. On error or drop the mutations are undone, so no
//! partial operation is ever observable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (Holds repository states, tracks active tx, begins tx)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                │                           │
//!                ▼                           ▼
//!        ┌───────────────┐           ┌───────────────┐
//!        │  Transaction  │           │ GitRepository │
//!        │ (undo journal)│──────────▶│  (one commit) │
//!        └───────────────┘           └───────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use repoledger::transaction::TransactionManager;
//!
//! let manager = TransactionManager::new(store);
//! manager.install(state);
//!
//! manager.with_transaction(&repository_id, "create version", |tx| {
//!     tx.put_version(version);
//!     tx.set_repository(repository);
//!     Ok::<_, TransactionError>(())
//! })?;
//! ```

mod context;
mod error;
mod manager;

pub use context::{Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted};
pub use error::{TransactionError, TransactionResult};
pub use manager::TransactionManager;
