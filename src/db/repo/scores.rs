//! Score ledger persistence: one compounding chain per (trader, period).

use crate::db::repo::decimal_col;
use crate::domain::{Period, ScoreEntry, TimeMs, TraderId};
use crate::error::CoreError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// Insert or overwrite the score entry at the entry's time.
///
/// Retroactive recomputes rewrite existing rows in place; a row's time never
/// changes once written.
pub async fn upsert(conn: &mut SqliteConnection, entry: &ScoreEntry) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO scores (trader_id, period, score, time_ms)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(trader_id, period, time_ms) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(entry.trader_id.as_str())
    .bind(entry.period.as_str())
    .bind(entry.score.to_canonical_string())
    .bind(entry.time.as_i64())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The latest score entry at or before `time`, if any.
pub async fn latest_at_or_before(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    time: TimeMs,
) -> Result<Option<ScoreEntry>, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT trader_id, period, score, time_ms FROM scores
        WHERE trader_id = ? AND period = ? AND time_ms <= ?
        ORDER BY time_ms DESC
        LIMIT 1
        "#,
    )
    .bind(trader_id.as_str())
    .bind(period.as_str())
    .bind(time.as_i64())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// Every score entry strictly after `time`, ascending.
pub async fn entries_after_asc(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    time: TimeMs,
) -> Result<Vec<ScoreEntry>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT trader_id, period, score, time_ms FROM scores
        WHERE trader_id = ? AND period = ? AND time_ms > ?
        ORDER BY time_ms ASC
        "#,
    )
    .bind(trader_id.as_str())
    .bind(period.as_str())
    .bind(time.as_i64())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(from_row).collect()
}

/// True when no entry for (trader, period) is strictly newer than `time`.
pub async fn is_latest(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    time: TimeMs,
) -> Result<bool, CoreError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM scores WHERE trader_id = ? AND period = ? AND time_ms > ?",
    )
    .bind(trader_id.as_str())
    .bind(period.as_str())
    .bind(time.as_i64())
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.0 == 0)
}

/// Delete entries strictly before `time`. Used when a period's window slides.
pub async fn remove_before(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    time: TimeMs,
) -> Result<u64, CoreError> {
    let result =
        sqlx::query("DELETE FROM scores WHERE trader_id = ? AND period = ? AND time_ms < ?")
            .bind(trader_id.as_str())
            .bind(period.as_str())
            .bind(time.as_i64())
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected())
}

/// Score history within `[start, end]`, ascending, capped at `limit`.
pub async fn history(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    period: &Period,
    start: TimeMs,
    end: TimeMs,
    limit: i64,
) -> Result<Vec<ScoreEntry>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT trader_id, period, score, time_ms FROM scores
        WHERE trader_id = ? AND period = ? AND time_ms >= ? AND time_ms <= ?
        ORDER BY time_ms ASC
        LIMIT ?
        "#,
    )
    .bind(trader_id.as_str())
    .bind(period.as_str())
    .bind(start.as_i64())
    .bind(end.as_i64())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(from_row).collect()
}

fn from_row(row: &SqliteRow) -> Result<ScoreEntry, CoreError> {
    let score_str: String = row.get("score");
    Ok(ScoreEntry {
        trader_id: TraderId::new(row.get::<String, _>("trader_id")),
        period: Period::new(row.get::<String, _>("period")),
        score: decimal_col("score", &score_str)?,
        time: TimeMs::new(row.get("time_ms")),
    })
}
