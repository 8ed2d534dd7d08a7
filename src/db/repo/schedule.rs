//! Score update schedule: pending periodic re-score triggers.

use crate::domain::{Period, ScheduleEntry, TimeMs, TraderId};
use crate::error::CoreError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

/// Queue a re-score of (trader, period) once `due_time` passes.
pub async fn insert(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    due_time: TimeMs,
) -> Result<i64, CoreError> {
    let result = sqlx::query(
        "INSERT INTO score_update_schedule (trader_id, period, due_time_ms) VALUES (?, ?, ?)",
    )
    .bind(trader_id.as_str())
    .bind(period.as_str())
    .bind(due_time.as_i64())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Entries whose due time has passed, oldest first.
pub async fn due(
    conn: &mut SqliteConnection,
    now: TimeMs,
    limit: i64,
) -> Result<Vec<ScheduleEntry>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, trader_id, period, due_time_ms FROM score_update_schedule
        WHERE due_time_ms <= ?
        ORDER BY due_time_ms ASC, id ASC
        LIMIT ?
        "#,
    )
    .bind(now.as_i64())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ScheduleEntry {
            id: row.get("id"),
            trader_id: TraderId::new(row.get::<String, _>("trader_id")),
            period: Period::new(row.get::<String, _>("period")),
            due_time: TimeMs::new(row.get("due_time_ms")),
        })
        .collect())
}

/// Remove a processed schedule entry.
pub async fn complete(conn: &mut SqliteConnection, id: i64) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM score_update_schedule WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
