//! Transfer persistence: deposits and withdrawals.
//!
//! Both kinds share one table; only deposits track unused quantity, since
//! only deposits are inflow inventory for the entry matcher.

use crate::db::repo::decimal_col;
use crate::domain::{Asset, Decimal, Deposit, ExchangeId, TimeMs, TraderId, Withdrawal};
use crate::engine::matcher::{EntryOrigin, InflowRecord, PageCursor};
use crate::error::CoreError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

const KIND_DEPOSIT: &str = "deposit";
const KIND_WITHDRAWAL: &str = "withdrawal";

/// Insert a deposit idempotently. Returns false on a redelivered event.
pub async fn insert_deposit(
    conn: &mut SqliteConnection,
    deposit: &Deposit,
) -> Result<bool, CoreError> {
    insert_transfer(
        conn,
        KIND_DEPOSIT,
        &deposit.trader_id,
        &deposit.exchange_id,
        &deposit.source_id,
        &deposit.asset,
        deposit.quantity,
        deposit.quantity_unused,
        deposit.time,
    )
    .await
}

/// Insert a withdrawal idempotently. Returns false on a redelivered event.
pub async fn insert_withdrawal(
    conn: &mut SqliteConnection,
    withdrawal: &Withdrawal,
) -> Result<bool, CoreError> {
    insert_transfer(
        conn,
        KIND_WITHDRAWAL,
        &withdrawal.trader_id,
        &withdrawal.exchange_id,
        &withdrawal.source_id,
        &withdrawal.asset,
        withdrawal.quantity,
        Decimal::zero(),
        withdrawal.time,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_transfer(
    conn: &mut SqliteConnection,
    kind: &str,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    source_id: &str,
    asset: &Asset,
    quantity: Decimal,
    quantity_unused: Decimal,
    time: TimeMs,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO transfers (
            kind, trader_id, exchange_id, source_id, asset,
            quantity, quantity_unused, time_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(kind, trader_id, exchange_id, source_id) DO NOTHING
        "#,
    )
    .bind(kind)
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(source_id)
    .bind(asset.as_str())
    .bind(quantity.to_canonical_string())
    .bind(quantity_unused.to_canonical_string())
    .bind(time.as_i64())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// One page of unused deposit inflows for an asset, newest first.
///
/// Same keyset pagination contract as `orders::unused_page`.
pub async fn unused_deposits_page(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    max_time: TimeMs,
    cursor: Option<&PageCursor>,
    limit: i64,
) -> Result<Vec<InflowRecord>, CoreError> {
    let rows = match cursor {
        None => {
            sqlx::query(
                r#"
                SELECT id, source_id, quantity_unused, time_ms
                FROM transfers
                WHERE kind = 'deposit'
                  AND trader_id = ? AND exchange_id = ? AND asset = ?
                  AND CAST(quantity_unused AS REAL) > 0
                  AND time_ms <= ?
                ORDER BY time_ms DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(trader_id.as_str())
            .bind(exchange_id.as_str())
            .bind(asset.as_str())
            .bind(max_time.as_i64())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
        Some(c) => {
            sqlx::query(
                r#"
                SELECT id, source_id, quantity_unused, time_ms
                FROM transfers
                WHERE kind = 'deposit'
                  AND trader_id = ? AND exchange_id = ? AND asset = ?
                  AND CAST(quantity_unused AS REAL) > 0
                  AND (time_ms < ? OR (time_ms = ? AND id < ?))
                ORDER BY time_ms DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(trader_id.as_str())
            .bind(exchange_id.as_str())
            .bind(asset.as_str())
            .bind(c.time.as_i64())
            .bind(c.time.as_i64())
            .bind(c.row_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
    };

    rows.iter()
        .map(|row| {
            let unused_str: String = row.get("quantity_unused");
            Ok(InflowRecord {
                row_id: row.get("id"),
                source_id: row.get("source_id"),
                quantity_unused: decimal_col("quantity_unused", &unused_str)?,
                time: TimeMs::new(row.get("time_ms")),
                origin: EntryOrigin::Deposit,
            })
        })
        .collect()
}

/// Consume unused quantity from a deposit after a trade is created from it.
pub async fn use_deposit_quantity(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    source_id: &str,
    quantity: Decimal,
) -> Result<(), CoreError> {
    let row = sqlx::query(
        r#"
        SELECT quantity_unused FROM transfers
        WHERE kind = 'deposit' AND trader_id = ? AND exchange_id = ? AND source_id = ?
        "#,
    )
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        CoreError::UnexpectedState(format!("deposit {} not found for consumption", source_id))
    })?;

    let unused_str: String = row.get("quantity_unused");
    let unused = decimal_col("quantity_unused", &unused_str)?;
    let remaining = unused - quantity;

    if remaining.is_negative() {
        return Err(CoreError::InsufficientEntries(format!(
            "deposit {} has {} unused, cannot consume {}",
            source_id, unused, quantity
        )));
    }

    sqlx::query(
        r#"
        UPDATE transfers SET quantity_unused = ?
        WHERE kind = 'deposit' AND trader_id = ? AND exchange_id = ? AND source_id = ?
        "#,
    )
    .bind(remaining.to_canonical_string())
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(source_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
