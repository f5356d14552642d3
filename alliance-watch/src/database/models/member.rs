use player_api::PlayerSnapshot;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored snapshot of one alliance member.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberDbModel {
    pub player_id: i64,
    pub nickname: String,
    pub furnace_level: i64,
    pub furnace_content: Option<String>,
    pub state_id: i64,
    pub alliance_id: i64,
}

impl MemberDbModel {
    pub fn from_snapshot(snapshot: &PlayerSnapshot, alliance_id: i64) -> Self {
        Self {
            player_id: snapshot.player_id,
            nickname: snapshot.nickname.trim().to_string(),
            furnace_level: snapshot.furnace_level,
            furnace_content: snapshot.furnace_content.clone(),
            state_id: snapshot.state_id,
            alliance_id,
        }
    }
}
