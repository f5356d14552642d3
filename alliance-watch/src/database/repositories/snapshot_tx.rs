//! Transactional operations for member snapshots and the change log.
//!
//! A detected change and the snapshot it was derived from must land
//! together, otherwise a failed snapshot write would leave log rows behind
//! that the next check appends again.

use sqlx::SqliteConnection;

use crate::Result;
use crate::database::models::{MemberDbModel, NewChangeRecord};

/// Snapshot operations that run inside a caller-owned transaction.
///
/// These methods do NOT commit.
pub struct SnapshotTxOps;

impl SnapshotTxOps {
    /// Append one change log row and return its id.
    pub async fn append_change(tx: &mut SqliteConnection, record: &NewChangeRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO change_log (player_id, field, old_value, new_value, changed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.player_id)
        .bind(record.field.as_str())
        .bind(&record.old_value)
        .bind(&record.new_value)
        .bind(record.changed_at)
        .execute(tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite the snapshot fields of a member, keeping its alliance.
    pub async fn update_snapshot(tx: &mut SqliteConnection, member: &MemberDbModel) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET nickname = ?, furnace_level = ?, furnace_content = ?, state_id = ?
            WHERE player_id = ?
            "#,
        )
        .bind(&member.nickname)
        .bind(member.furnace_level)
        .bind(&member.furnace_content)
        .bind(member.state_id)
        .bind(member.player_id)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }
}
