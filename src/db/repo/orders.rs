//! Order persistence: idempotent inserts, unused-inflow pagination, consumption.

use crate::db::repo::decimal_col;
use crate::domain::{Asset, Decimal, ExchangeId, Order, Side, TimeMs, TraderId};
use crate::engine::matcher::{EntryOrigin, InflowRecord, PageCursor};
use crate::error::CoreError;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

/// Insert a filled order idempotently.
///
/// Returns false when an order with the same (trader, exchange, source)
/// already exists; the caller treats that as a redelivered event.
pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO orders (
            trader_id, exchange_id, source_id, side, asset, quote_asset,
            price, quantity, quantity_unused, fee_asset, fee_quantity, time_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(trader_id, exchange_id, source_id) DO NOTHING
        "#,
    )
    .bind(order.trader_id.as_str())
    .bind(order.exchange_id.as_str())
    .bind(order.source_id.as_str())
    .bind(order.side.as_str())
    .bind(order.asset.as_str())
    .bind(order.quote_asset.as_str())
    .bind(order.price.to_canonical_string())
    .bind(order.quantity.to_canonical_string())
    .bind(order.quantity_unused.to_canonical_string())
    .bind(order.fee.as_ref().map(|f| f.asset.as_str().to_string()))
    .bind(order.fee.as_ref().map(|f| f.quantity.to_canonical_string()))
    .bind(order.time.as_i64())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// One page of unused order inflows for an asset, newest first.
///
/// Keyset-paginated on (time_ms, id): passing the cursor of the previous
/// page's last row returns strictly older rows, so repeated fetches walk the
/// entire unused inventory without revisiting rows.
///
/// `exclude_source_id` drops one order from the page. An order-derived
/// outflow is matched inside the transaction that inserted the order, so
/// without the exclusion a sell would consume its own just-inserted row.
pub async fn unused_page(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    asset: &Asset,
    max_time: TimeMs,
    cursor: Option<&PageCursor>,
    limit: i64,
    exclude_source_id: Option<&str>,
) -> Result<Vec<InflowRecord>, CoreError> {
    let rows = match cursor {
        None => {
            sqlx::query(
                r#"
                SELECT id, source_id, side, quote_asset, quantity_unused, time_ms
                FROM orders
                WHERE trader_id = ? AND exchange_id = ? AND asset = ?
                  AND CAST(quantity_unused AS REAL) > 0
                  AND time_ms <= ?
                  AND (? IS NULL OR source_id <> ?)
                ORDER BY time_ms DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(trader_id.as_str())
            .bind(exchange_id.as_str())
            .bind(asset.as_str())
            .bind(max_time.as_i64())
            .bind(exclude_source_id)
            .bind(exclude_source_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
        Some(c) => {
            sqlx::query(
                r#"
                SELECT id, source_id, side, quote_asset, quantity_unused, time_ms
                FROM orders
                WHERE trader_id = ? AND exchange_id = ? AND asset = ?
                  AND CAST(quantity_unused AS REAL) > 0
                  AND (time_ms < ? OR (time_ms = ? AND id < ?))
                  AND (? IS NULL OR source_id <> ?)
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
            .bind(exclude_source_id)
            .bind(exclude_source_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
    };

    rows.iter()
        .map(|row| {
            let side_str: String = row.get("side");
            let side = Side::parse(&side_str).ok_or_else(|| {
                CoreError::UnexpectedState(format!("unknown order side: {:?}", side_str))
            })?;
            let unused_str: String = row.get("quantity_unused");

            Ok(InflowRecord {
                row_id: row.get("id"),
                source_id: row.get("source_id"),
                quantity_unused: decimal_col("quantity_unused", &unused_str)?,
                time: TimeMs::new(row.get("time_ms")),
                origin: EntryOrigin::Order {
                    side,
                    quote_asset: Asset::new(row.get::<String, _>("quote_asset")),
                },
            })
        })
        .collect()
}

/// Consume unused quantity from an order after a trade is created from it.
pub async fn use_quantity(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    source_id: &str,
    quantity: Decimal,
) -> Result<(), CoreError> {
    let row = sqlx::query(
        "SELECT quantity_unused FROM orders WHERE trader_id = ? AND exchange_id = ? AND source_id = ?",
    )
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        CoreError::UnexpectedState(format!("order {} not found for consumption", source_id))
    })?;

    let unused_str: String = row.get("quantity_unused");
    let unused = decimal_col("quantity_unused", &unused_str)?;
    let remaining = unused - quantity;

    if remaining.is_negative() {
        return Err(CoreError::InsufficientEntries(format!(
            "order {} has {} unused, cannot consume {}",
            source_id, unused, quantity
        )));
    }

    sqlx::query(
        "UPDATE orders SET quantity_unused = ? WHERE trader_id = ? AND exchange_id = ? AND source_id = ?",
    )
    .bind(remaining.to_canonical_string())
    .bind(trader_id.as_str())
    .bind(exchange_id.as_str())
    .bind(source_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
