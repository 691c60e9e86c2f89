//! The repository version ledger.
//!
//! Versions of a repository are numbered from 1. Membership is stored as
//! intervals: one [`LedgerEntry`](crate::catalog::LedgerEntry) per stretch of
//! versions a content unit is present in. A version only records the entries
//! it opened or closed, so its content is reconstructed by walking the
//! versions up to it.
//!
//! ```text
//!   number:   1    2    3    4
//!   a         [---------)           added at 1, removed at 3
//!   b              [---------------  added at 2, still open
//! ```
//!
//! [`Ledger`] is the entry point. [`MembershipLedger`], [`ContentCounter`] and
//! [`SquashEngine`] hold the algorithms and operate inside a transaction.

mod counter;
mod error;
mod membership;
mod service;
mod squash;

pub use counter::ContentCounter;
pub use error::{LedgerError, LedgerResult};
pub use membership::MembershipLedger;
pub use service::{Ledger, LedgerStats, RecoveryReport};
pub use squash::{SquashEngine, SquashOutcome};
