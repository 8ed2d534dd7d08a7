//! Repository layer for database operations.
//!
//! Mutating functions take `&mut SqliteConnection` so they run inside the
//! caller's transaction (see the unit of work in `orchestration`). The
//! [`Repository`] struct wraps a pool for the read-only query surface.

pub mod orders;
pub mod portfolio;
pub mod schedule;
pub mod scores;
pub mod trades;
pub mod transfers;

use crate::domain::{Decimal, Period, ScoreEntry, TimeMs, TraderId};
use crate::error::CoreError;
use sqlx::sqlite::SqlitePool;

/// Decode a decimal column stored as canonical text.
pub(crate) fn decimal_col(column: &str, raw: &str) -> Result<Decimal, CoreError> {
    Decimal::from_str_canonical(raw).map_err(|_| {
        CoreError::UnexpectedState(format!(
            "non-decimal value in column {}: {:?}",
            column, raw
        ))
    })
}

/// Read-only repository over the connection pool.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Score history for a trader and period within a time window, ascending.
    pub async fn score_history(
        &self,
        trader_id: &TraderId,
        period: &Period,
        start: TimeMs,
        end: TimeMs,
        limit: i64,
    ) -> Result<Vec<ScoreEntry>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        scores::history(&mut conn, trader_id, period, start, end, limit).await
    }

    /// The latest score entry for a trader and period, if any.
    pub async fn latest_score(
        &self,
        trader_id: &TraderId,
        period: &Period,
    ) -> Result<Option<ScoreEntry>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        scores::latest_at_or_before(&mut conn, trader_id, period, TimeMs::new(i64::MAX)).await
    }
}
