//! Alliance repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{AllianceDbModel, AllianceScheduleDbModel};
use crate::{Error, Result};

/// Alliance repository trait.
#[async_trait]
pub trait AllianceRepository: Send + Sync {
    async fn get_alliance(&self, alliance_id: i64) -> Result<AllianceDbModel>;
    /// Every alliance with its schedule; alliances without settings report interval 0.
    async fn list_schedules(&self) -> Result<Vec<AllianceScheduleDbModel>>;
    /// Current interval in minutes, `None` when the alliance no longer exists.
    async fn get_interval(&self, alliance_id: i64) -> Result<Option<i64>>;
    async fn upsert_alliance(&self, alliance_id: i64, name: &str) -> Result<()>;
    async fn set_interval(
        &self,
        alliance_id: i64,
        channel_id: Option<i64>,
        interval_minutes: i64,
    ) -> Result<()>;
    async fn delete_alliance(&self, alliance_id: i64) -> Result<()>;
}

/// SQLx implementation of AllianceRepository.
pub struct SqlxAllianceRepository {
    pool: SqlitePool,
}

impl SqlxAllianceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllianceRepository for SqlxAllianceRepository {
    async fn get_alliance(&self, alliance_id: i64) -> Result<AllianceDbModel> {
        sqlx::query_as::<_, AllianceDbModel>("SELECT * FROM alliances WHERE alliance_id = ?")
            .bind(alliance_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Alliance", alliance_id.to_string()))
    }

    async fn list_schedules(&self) -> Result<Vec<AllianceScheduleDbModel>> {
        let schedules = sqlx::query_as::<_, AllianceScheduleDbModel>(
            r#"
            SELECT a.alliance_id, a.name, s.channel_id,
                   COALESCE(s.interval_minutes, 0) AS interval_minutes
            FROM alliances a
            LEFT JOIN alliance_settings s ON s.alliance_id = a.alliance_id
            ORDER BY a.alliance_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(schedules)
    }

    async fn get_interval(&self, alliance_id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT COALESCE(s.interval_minutes, 0)
            FROM alliances a
            LEFT JOIN alliance_settings s ON s.alliance_id = a.alliance_id
            WHERE a.alliance_id = ?
            "#,
        )
        .bind(alliance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(interval,)| interval))
    }

    async fn upsert_alliance(&self, alliance_id: i64, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alliances (alliance_id, name) VALUES (?, ?)
            ON CONFLICT(alliance_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(alliance_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_interval(
        &self,
        alliance_id: i64,
        channel_id: Option<i64>,
        interval_minutes: i64,
    ) -> Result<()> {
        if interval_minutes < 0 {
            return Err(Error::Other(format!(
                "interval must not be negative, got {}",
                interval_minutes
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO alliance_settings (alliance_id, channel_id, interval_minutes)
            VALUES (?, ?, ?)
            ON CONFLICT(alliance_id) DO UPDATE SET
                channel_id = COALESCE(excluded.channel_id, alliance_settings.channel_id),
                interval_minutes = excluded.interval_minutes
            "#,
        )
        .bind(alliance_id)
        .bind(channel_id)
        .bind(interval_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_alliance(&self, alliance_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM alliances WHERE alliance_id = ?")
            .bind(alliance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
