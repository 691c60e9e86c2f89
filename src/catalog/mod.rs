//! Catalog of ledger records.
//!
//! Typed identifiers and the persisted record shapes live in `types`. The
//! per-repository indexed state that the ledger reads and mutates lives in
//! `state`, and the shared content registry in `registry`.

mod registry;
mod state;
mod types;

pub use registry::{ContentRegistry, ContentTypes, Registration};
pub use state::{RepositoryState, RowRef};
pub use types::{
    Collection, ContentId, ContentType, ContentUnit, CountRecord, CountSummary, CountType, EntryId,
    LedgerEntry, PendingVersion, RepositoryId, RepositoryRecord, VersionId, VersionRecord,
};
