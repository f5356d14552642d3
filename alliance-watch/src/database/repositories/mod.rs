//! Repository layer for database access.
//!
//! The monitoring core only depends on these traits; the sqlx
//! implementations back them with SQLite.

pub mod alliance;
pub mod change;
pub mod member;
pub mod snapshot_tx;

pub use alliance::*;
pub use change::*;
pub use member::*;
pub use snapshot_tx::SnapshotTxOps;
