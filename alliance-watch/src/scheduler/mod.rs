//! Periodic alliance checks.
//!
//! One waiter task per enabled alliance enqueues check operations; a
//! reconciliation loop keeps the set of waiters in line with the stored
//! schedules.

mod service;
mod task;

pub use service::{AllianceMonitor, MonitorConfig, ReconcileReport};
pub use task::WaiterHandle;
