//! Change log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::SnapshotTxOps;
use crate::database::models::{ChangeRecordDbModel, MemberDbModel, NewChangeRecord};
use crate::{Error, Result};

/// Change log repository trait. The log is append-only.
#[async_trait]
pub trait ChangeRepository: Send + Sync {
    /// Append a record and return its id.
    async fn append_change(&self, record: &NewChangeRecord) -> Result<i64>;
    async fn list_for_player(&self, player_id: i64) -> Result<Vec<ChangeRecordDbModel>>;
    /// Append `records` and overwrite the member snapshot atomically.
    ///
    /// Nothing is written when the member no longer exists.
    async fn record_snapshot(&self, records: &[NewChangeRecord], member: &MemberDbModel)
    -> Result<()>;
}

/// SQLx implementation of ChangeRepository.
pub struct SqlxChangeRepository {
    pool: SqlitePool,
}

impl SqlxChangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeRepository for SqlxChangeRepository {
    async fn append_change(&self, record: &NewChangeRecord) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        SnapshotTxOps::append_change(&mut *conn, record).await
    }

    async fn list_for_player(&self, player_id: i64) -> Result<Vec<ChangeRecordDbModel>> {
        let records = sqlx::query_as::<_, ChangeRecordDbModel>(
            "SELECT * FROM change_log WHERE player_id = ? ORDER BY changed_at, id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn record_snapshot(
        &self,
        records: &[NewChangeRecord],
        member: &MemberDbModel,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            SnapshotTxOps::append_change(&mut *tx, record).await?;
        }
        if SnapshotTxOps::update_snapshot(&mut *tx, member).await? == 0 {
            tx.rollback().await?;
            return Err(Error::not_found("Member", member.player_id.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }
}
