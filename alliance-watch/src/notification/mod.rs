//! Status reporting.

pub mod events;

pub use events::{StatusBroadcaster, StatusEvent, spawn_status_logger};
