//! Roster monitoring: diffing fetched player data against stored snapshots.

mod detector;
mod summary;

pub use detector::{ChangeDetector, DetectorConfig, PlayerFetcher, diff_snapshot};
pub use summary::{CheckSummary, DetectedChange, FailedMember, RemovedMember};
