use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tracked member attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeField {
    FurnaceLevel,
    Nickname,
    StateId,
}

impl ChangeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeField::FurnaceLevel => "furnace_level",
            ChangeField::Nickname => "nickname",
            ChangeField::StateId => "state_id",
        }
    }
}

impl std::fmt::Display for ChangeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change about to be appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChangeRecord {
    pub player_id: i64,
    pub field: ChangeField,
    pub old_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}

/// Persisted change log entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChangeRecordDbModel {
    pub id: i64,
    pub player_id: i64,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_at: DateTime<Utc>,
}
