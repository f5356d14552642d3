//! Aggregate results of one roster check.

use player_api::furnace_display;
use serde::{Deserialize, Serialize};

use crate::database::models::ChangeField;

/// One detected difference between the stored and the fetched snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedChange {
    pub player_id: i64,
    /// Nickname as stored before the check.
    pub nickname: String,
    pub field: ChangeField,
    pub old_value: String,
    pub new_value: String,
}

impl DetectedChange {
    pub fn describe(&self) -> String {
        match self.field {
            ChangeField::FurnaceLevel => {
                let display = |v: &str| match v.parse::<i64>() {
                    Ok(level) => furnace_display(level),
                    Err(_) => v.to_string(),
                };
                format!(
                    "{} ({}) furnace {} -> {}",
                    self.nickname,
                    self.player_id,
                    display(&self.old_value),
                    display(&self.new_value)
                )
            }
            ChangeField::Nickname => format!(
                "{} ({}) renamed to {}",
                self.old_value, self.player_id, self.new_value
            ),
            ChangeField::StateId => format!(
                "{} ({}) moved from state {} to {}",
                self.nickname, self.player_id, self.old_value, self.new_value
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedMember {
    pub player_id: i64,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMember {
    pub player_id: i64,
    pub reason: String,
}

/// Outcome of checking a set of members.
///
/// `checked` counts members the API gave a definitive answer for (including
/// ids it reported as not found); members that ended in an error are only
/// counted in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSummary {
    /// `None` for a refresh across all alliances.
    pub alliance_id: Option<i64>,
    pub checked: usize,
    pub furnace_changes: usize,
    pub nickname_changes: usize,
    pub state_changes: usize,
    pub failures: usize,
    pub auto_removed: usize,
    pub duration_seconds: f64,
    pub changes: Vec<DetectedChange>,
    pub removed: Vec<RemovedMember>,
    pub failed: Vec<FailedMember>,
}

impl CheckSummary {
    pub fn new(alliance_id: Option<i64>) -> Self {
        Self {
            alliance_id,
            ..Default::default()
        }
    }

    pub fn record_change(&mut self, change: DetectedChange) {
        match change.field {
            ChangeField::FurnaceLevel => self.furnace_changes += 1,
            ChangeField::Nickname => self.nickname_changes += 1,
            ChangeField::StateId => self.state_changes += 1,
        }
        self.changes.push(change);
    }

    pub fn record_removal(&mut self, player_id: i64, nickname: &str) {
        self.checked += 1;
        self.auto_removed += 1;
        self.removed.push(RemovedMember {
            player_id,
            nickname: nickname.to_string(),
        });
    }

    pub fn record_failure(&mut self, player_id: i64, reason: impl Into<String>) {
        self.failures += 1;
        self.failed.push(FailedMember {
            player_id,
            reason: reason.into(),
        });
    }

    pub fn total_changes(&self) -> usize {
        self.furnace_changes + self.nickname_changes + self.state_changes
    }

    pub fn description(&self) -> String {
        let scope = match self.alliance_id {
            Some(id) => format!("alliance {id}"),
            None => "all alliances".to_string(),
        };
        format!(
            "{scope}: checked {}, furnace {}, nickname {}, state {}, failures {}, auto-removed {} in {:.1}s",
            self.checked,
            self.furnace_changes,
            self.nickname_changes,
            self.state_changes,
            self.failures,
            self.auto_removed,
            self.duration_seconds
        )
    }
}
