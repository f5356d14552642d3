//! Waiter task handles.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A handle to one alliance's waiter task.
#[derive(Debug)]
pub struct WaiterHandle {
    pub alliance_id: i64,
    /// Interval the waiter is sleeping on, in minutes.
    pub interval_minutes: i64,
    /// Bumped every time the slot is re-armed, so a superseded waiter can
    /// tell it is no longer current.
    pub generation: u64,
    /// When the waiter was created.
    pub created_at: Instant,
    /// Cancellation token for this waiter.
    pub cancellation_token: CancellationToken,
    join: JoinHandle<()>,
}

impl WaiterHandle {
    pub fn new(
        alliance_id: i64,
        interval_minutes: i64,
        generation: u64,
        cancellation_token: CancellationToken,
        join: JoinHandle<()>,
    ) -> Self {
        Self {
            alliance_id,
            interval_minutes,
            generation,
            created_at: Instant::now(),
            cancellation_token,
            join,
        }
    }

    /// Cancel this waiter.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Get the elapsed time since the waiter was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}
