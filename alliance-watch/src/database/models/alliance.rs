use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Alliance database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllianceDbModel {
    pub alliance_id: i64,
    pub name: String,
}

/// An alliance together with its configured check interval.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllianceScheduleDbModel {
    pub alliance_id: i64,
    pub name: String,
    pub channel_id: Option<i64>,
    /// Minutes between checks; 0 means disabled.
    pub interval_minutes: i64,
}

impl AllianceScheduleDbModel {
    pub fn is_enabled(&self) -> bool {
        self.interval_minutes > 0
    }
}
