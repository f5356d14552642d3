//! Member snapshot repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::SnapshotTxOps;
use crate::database::models::MemberDbModel;
use crate::{Error, Result};

/// Member repository trait.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn get_member(&self, player_id: i64) -> Result<MemberDbModel>;
    async fn list_by_alliance(&self, alliance_id: i64) -> Result<Vec<MemberDbModel>>;
    async fn list_all(&self) -> Result<Vec<MemberDbModel>>;
    async fn upsert_member(&self, member: &MemberDbModel) -> Result<()>;
    /// Overwrite the stored snapshot fields, keeping the alliance.
    async fn update_snapshot(&self, member: &MemberDbModel) -> Result<()>;
    /// Returns whether a row was removed.
    async fn delete_member(&self, player_id: i64) -> Result<bool>;
}

/// SQLx implementation of MemberRepository.
pub struct SqlxMemberRepository {
    pool: SqlitePool,
}

impl SqlxMemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberRepository for SqlxMemberRepository {
    async fn get_member(&self, player_id: i64) -> Result<MemberDbModel> {
        sqlx::query_as::<_, MemberDbModel>("SELECT * FROM members WHERE player_id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Member", player_id.to_string()))
    }

    async fn list_by_alliance(&self, alliance_id: i64) -> Result<Vec<MemberDbModel>> {
        let members = sqlx::query_as::<_, MemberDbModel>(
            "SELECT * FROM members WHERE alliance_id = ? ORDER BY player_id",
        )
        .bind(alliance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn list_all(&self) -> Result<Vec<MemberDbModel>> {
        let members =
            sqlx::query_as::<_, MemberDbModel>("SELECT * FROM members ORDER BY alliance_id, player_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(members)
    }

    async fn upsert_member(&self, member: &MemberDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (player_id, nickname, furnace_level, furnace_content, state_id, alliance_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(player_id) DO UPDATE SET
                nickname = excluded.nickname,
                furnace_level = excluded.furnace_level,
                furnace_content = excluded.furnace_content,
                state_id = excluded.state_id,
                alliance_id = excluded.alliance_id
            "#,
        )
        .bind(member.player_id)
        .bind(&member.nickname)
        .bind(member.furnace_level)
        .bind(&member.furnace_content)
        .bind(member.state_id)
        .bind(member.alliance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_snapshot(&self, member: &MemberDbModel) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        if SnapshotTxOps::update_snapshot(&mut *conn, member).await? == 0 {
            return Err(Error::not_found("Member", member.player_id.to_string()));
        }
        Ok(())
    }

    async fn delete_member(&self, player_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM members WHERE player_id = ?")
            .bind(player_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
