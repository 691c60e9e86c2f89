//! Versions as handles.
//!
//! A version moves through `Building -> Complete`, and may be deleted from
//! either state. Only a building version accepts content changes.

mod handle;
mod session;

pub use handle::VersionHandle;
pub use session::VersionSession;
