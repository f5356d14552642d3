//! Status events for the reporting layer.
//!
//! Events are plain structured messages; rendering them is up to whoever
//! subscribes.

use chrono::{DateTime, Utc};
use player_api::ProviderMode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::CheckSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusEvent {
    /// Provider route (re-)evaluated.
    ProviderMode {
        description: String,
        mode: ProviderMode,
        timestamp: DateTime<Utc>,
    },
    /// The API throttled us; the worker is backing off.
    ThrottleWait {
        player_id: Option<i64>,
        wait_secs: u64,
        consecutive_throttles: u32,
        timestamp: DateTime<Utc>,
    },
    CheckStarted {
        alliance_id: Option<i64>,
        alliance_name: Option<String>,
        member_count: usize,
        timestamp: DateTime<Utc>,
    },
    CheckProgress {
        alliance_id: Option<i64>,
        processed: usize,
        total: usize,
    },
    CheckCompleted {
        summary: CheckSummary,
        timestamp: DateTime<Utc>,
    },
    RefreshCompleted {
        summary: CheckSummary,
        timestamp: DateTime<Utc>,
    },
    MemberAutoRemoved {
        player_id: i64,
        nickname: String,
        alliance_id: i64,
        timestamp: DateTime<Utc>,
    },
    OperationFailed {
        operation_id: String,
        description: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl StatusEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            StatusEvent::ProviderMode { description, .. } => description.clone(),
            StatusEvent::ThrottleWait {
                player_id,
                wait_secs,
                consecutive_throttles,
                ..
            } => match player_id {
                Some(id) => format!(
                    "rate limited at player {id}, waiting {wait_secs}s (throttle #{consecutive_throttles})"
                ),
                None => format!(
                    "rate limited, waiting {wait_secs}s (throttle #{consecutive_throttles})"
                ),
            },
            StatusEvent::CheckStarted {
                alliance_id,
                alliance_name,
                member_count,
                ..
            } => match (alliance_id, alliance_name) {
                (Some(id), Some(name)) => {
                    format!("checking {member_count} members of {name} ({id})")
                }
                (Some(id), None) => format!("checking {member_count} members of alliance {id}"),
                (None, _) => format!("refreshing {member_count} members"),
            },
            StatusEvent::CheckProgress {
                processed, total, ..
            } => format!("{processed}/{total} members processed"),
            StatusEvent::CheckCompleted { summary, .. } => {
                format!("check finished, {}", summary.description())
            }
            StatusEvent::RefreshCompleted { summary, .. } => {
                format!("refresh finished, {}", summary.description())
            }
            StatusEvent::MemberAutoRemoved {
                player_id,
                nickname,
                alliance_id,
                ..
            } => format!("{nickname} ({player_id}) removed from alliance {alliance_id}: player no longer exists"),
            StatusEvent::OperationFailed {
                description, error, ..
            } => format!("{description} failed: {error}"),
        }
    }

    /// Whether the event reports a problem.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            StatusEvent::ThrottleWait { .. }
                | StatusEvent::MemberAutoRemoved { .. }
                | StatusEvent::OperationFailed { .. }
        )
    }
}

/// Broadcaster for status events.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every status event until cancelled.
pub fn spawn_status_logger(
    broadcaster: &StatusBroadcaster,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = broadcaster.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(StatusEvent::CheckProgress { .. }) => {}
                    Ok(event) if event.is_warning() => warn!(target: "alliance_watch::status", "{}", event.description()),
                    Ok(event) => info!(target: "alliance_watch::status", "{}", event.description()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status logger lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Status logger stopped");
    })
}
