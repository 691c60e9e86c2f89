//! High-level Database API and shell.
//!
//! This module provides the user-facing handle to a ledger store, the
//! operator command set and an interactive command-line interface.

mod api;
mod command;
mod repl;

pub use api::{Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseStats};
pub use command::{Command, CommandOutput, HELP};
pub use repl::{Repl, ReplConfig};
