//! Queued operation definitions.

use chrono::{DateTime, Utc};
use player_api::PlayerResult;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// What an operation does, with the payload it needs.
#[derive(Debug)]
pub enum OperationKind {
    /// Run change detection for one alliance.
    AllianceCheck { alliance_id: i64 },
    /// Refresh every stored member, or those of one alliance.
    MemberRefresh { alliance_id: Option<i64> },
    /// One-off lookup; the result is sent back on `reply`.
    PlayerLookup {
        player_id: i64,
        proxy: Option<String>,
        reply: oneshot::Sender<PlayerResult>,
    },
    /// Re-run the provider probe.
    ProbeProviders,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::AllianceCheck { .. } => "alliance_check",
            OperationKind::MemberRefresh { .. } => "member_refresh",
            OperationKind::PlayerLookup { .. } => "player_lookup",
            OperationKind::ProbeProviders => "probe_providers",
        }
    }
}

/// A unit of queued work that uses the player API.
#[derive(Debug)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub description: String,
    /// Who asked for it (e.g. "scheduler", a command name).
    pub origin: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(kind: OperationKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            origin: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn alliance_check(alliance_id: i64) -> Self {
        Self::new(
            OperationKind::AllianceCheck { alliance_id },
            format!("check alliance {alliance_id}"),
        )
    }

    pub fn member_refresh(alliance_id: Option<i64>) -> Self {
        let description = match alliance_id {
            Some(id) => format!("refresh members of alliance {id}"),
            None => "refresh all members".to_string(),
        };
        Self::new(OperationKind::MemberRefresh { alliance_id }, description)
    }

    /// A lookup operation plus the receiver its result arrives on.
    pub fn player_lookup(
        player_id: i64,
        proxy: Option<String>,
    ) -> (Self, oneshot::Receiver<PlayerResult>) {
        let (reply, rx) = oneshot::channel();
        let operation = Self::new(
            OperationKind::PlayerLookup {
                player_id,
                proxy,
                reply,
            },
            format!("look up player {player_id}"),
        );
        (operation, rx)
    }

    pub fn probe_providers() -> Self {
        Self::new(OperationKind::ProbeProviders, "probe API providers")
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn target_alliance_id(&self) -> Option<i64> {
        match &self.kind {
            OperationKind::AllianceCheck { alliance_id } => Some(*alliance_id),
            OperationKind::MemberRefresh { alliance_id } => *alliance_id,
            _ => None,
        }
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            id: self.id,
            kind: self.kind.label().to_string(),
            alliance_id: self.target_alliance_id(),
            description: self.description.clone(),
            origin: self.origin.clone(),
            enqueued_at: self.enqueued_at,
            started_at: None,
        }
    }
}

/// Read-only view of an operation for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: Uuid,
    pub kind: String,
    pub alliance_id: Option<i64>,
    pub description: String,
    pub origin: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Set once the worker picked it up.
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let op = Operation::alliance_check(12).with_origin("scheduler");
        let summary = op.summary();
        assert_eq!(summary.id, op.id);
        assert_eq!(summary.kind, "alliance_check");
        assert_eq!(summary.alliance_id, Some(12));
        assert_eq!(summary.description, "check alliance 12");
        assert_eq!(summary.origin.as_deref(), Some("scheduler"));
        assert!(summary.started_at.is_none());
    }

    #[test]
    fn test_target_alliance() {
        assert_eq!(Operation::member_refresh(None).target_alliance_id(), None);
        assert_eq!(Operation::member_refresh(Some(4)).target_alliance_id(), Some(4));
        let (lookup, _rx) = Operation::player_lookup(42, None);
        assert_eq!(lookup.target_alliance_id(), None);
        assert_eq!(lookup.kind.label(), "player_lookup");
    }
}
