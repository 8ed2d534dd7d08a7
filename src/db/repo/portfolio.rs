//! Position ledger: per-(trader, exchange, asset) holdings over time.
//!
//! Mutations may arrive out of chronological order. Applying a delta at time
//! `t` inserts an entry at `t` and forward-propagates the delta into every
//! entry strictly after `t`, so point-in-time queries stay correct regardless
//! of insertion order.

use crate::db::repo::decimal_col;
use crate::domain::{Asset, Decimal, ExchangeId, TimeMs, TraderId};
use crate::error::CoreError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

/// One (exchange, asset) holding at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub exchange_id: ExchangeId,
    pub asset: Asset,
    pub quantity: Decimal,
}

/// Add `quantity` to the position at `time`.
pub async fn increment(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    quantity: Decimal,
    time: TimeMs,
) -> Result<(), CoreError> {
    apply(conn, trader_id, exchange_id, asset, quantity, time).await
}

/// Subtract `quantity` from the position at `time`.
///
/// Fails with `InsufficientBalance` when the balance at the insertion point
/// would go negative. Entries after the insertion point are adjusted without
/// re-validation.
pub async fn decrement(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    quantity: Decimal,
    time: TimeMs,
) -> Result<(), CoreError> {
    apply(conn, trader_id, exchange_id, asset, -quantity, time).await
}

async fn apply(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    delta: Decimal,
    time: TimeMs,
) -> Result<(), CoreError> {
    let base = quantity_at(conn, trader_id, exchange_id, asset, time).await?;
    let new_quantity = base + delta;

    if new_quantity.is_negative() {
        return Err(CoreError::InsufficientBalance(format!(
            "{} {} on {} would be {} at {}",
            trader_id,
            asset,
            exchange_id,
            new_quantity,
            time.as_i64()
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO position_entries (trader_id, exchange_id, asset, quantity, time_ms)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(asset.as_str())
    .bind(new_quantity.to_canonical_string())
    .bind(time.as_i64())
    .execute(&mut *conn)
    .await?;

    // Forward propagation: later entries absorb the same delta.
    let later = sqlx::query(
        r#"
        SELECT id, quantity FROM position_entries
        WHERE trader_id = ? AND exchange_id = ? AND asset = ? AND time_ms > ?
        "#,
    )
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(asset.as_str())
    .bind(time.as_i64())
    .fetch_all(&mut *conn)
    .await?;

    for row in later {
        let id: i64 = row.get("id");
        let quantity_str: String = row.get("quantity");
        let adjusted = decimal_col("quantity", &quantity_str)? + delta;

        sqlx::query("UPDATE position_entries SET quantity = ? WHERE id = ?")
            .bind(adjusted.to_canonical_string())
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// The position quantity at or before `time`, zero when no entry exists.
pub async fn quantity_at(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    time: TimeMs,
) -> Result<Decimal, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT quantity FROM position_entries
        WHERE trader_id = ? AND exchange_id = ? AND asset = ? AND time_ms <= ?
        ORDER BY time_ms DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(asset.as_str())
    .bind(time.as_i64())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let quantity_str: String = row.get("quantity");
            decimal_col("quantity", &quantity_str)
        }
        None => Ok(Decimal::zero()),
    }
}

/// Every (exchange, asset) the trader ever touched, valued at or before `time`.
pub async fn snapshot_all(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    time: TimeMs,
) -> Result<Vec<PositionSnapshot>, CoreError> {
    let pairs = sqlx::query(
        r#"
        SELECT DISTINCT exchange_id, asset FROM position_entries
        WHERE trader_id = ?
        ORDER BY exchange_id ASC, asset ASC
        "#,
    )
    .bind(trader_id.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut snapshots = Vec::with_capacity(pairs.len());
    for row in pairs {
        let exchange_id = ExchangeId::new(row.get::<String, _>("exchange_id"));
        let asset = Asset::new(row.get::<String, _>("asset"));
        let quantity = quantity_at(conn, trader_id, &exchange_id, &asset, time).await?;
        snapshots.push(PositionSnapshot {
            exchange_id,
            asset,
            quantity,
        });
    }

    Ok(snapshots)
}
