//! Trade persistence. Trades are created once and never mutated or deleted.

use crate::db::repo::decimal_col;
use crate::domain::{
    Asset, Decimal, ExchangeId, SourceType, TimeMs, Trade, TradeEntry, TradeExit, TraderId,
};
use crate::engine::matcher::PageCursor;
use crate::error::CoreError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// Insert a trade idempotently. Returns false when the same matched
/// (exit, entry) pair was already recorded.
pub async fn insert(conn: &mut SqliteConnection, trade: &Trade) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO trades (
            trader_id, exchange_id, asset, quote_asset, quantity,
            entry_source_id, entry_source_type, entry_price, entry_time_ms,
            exit_source_id, exit_source_type, exit_price, exit_time_ms,
            weight, score
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(trader_id, exchange_id, exit_source_id, exit_source_type,
                    entry_source_id, entry_source_type, entry_time_ms) DO NOTHING
        "#,
    )
    .bind(trade.trader_id.as_str())
    .bind(trade.exchange_id.as_str())
    .bind(trade.asset.as_str())
    .bind(trade.quote_asset.as_str())
    .bind(trade.quantity.to_canonical_string())
    .bind(trade.entry.source_id.as_str())
    .bind(trade.entry.source_type.as_str())
    .bind(trade.entry.price.to_canonical_string())
    .bind(trade.entry.time.as_i64())
    .bind(trade.exit.source_id.as_str())
    .bind(trade.exit.source_type.as_str())
    .bind(trade.exit.price.to_canonical_string())
    .bind(trade.exit.time.as_i64())
    .bind(trade.weight.to_canonical_string())
    .bind(trade.score.to_canonical_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// The trader's most recent trades exiting at or before `end_time`,
/// newest first. Feeds the scoring baseline statistics.
pub async fn recent(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    end_time: TimeMs,
    limit: i64,
) -> Result<Vec<Trade>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT trader_id, exchange_id, asset, quote_asset, quantity,
               entry_source_id, entry_source_type, entry_price, entry_time_ms,
               exit_source_id, exit_source_type, exit_price, exit_time_ms,
               weight, score
        FROM trades
        WHERE trader_id = ? AND exit_time_ms <= ?
        ORDER BY exit_time_ms DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(trader_id.as_str())
    .bind(end_time.as_i64())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(from_row).collect()
}

/// One ascending keyset page of trades with exit time in
/// `[start_time, end_time]`, tagged with row ids.
///
/// The cursor walks `(exit_time_ms, id)`, so trades sharing an exit time
/// across a page boundary are never skipped or repeated.
pub async fn page_asc(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
    start_time: TimeMs,
    end_time: TimeMs,
    cursor: Option<&PageCursor>,
    limit: i64,
) -> Result<Vec<(i64, Trade)>, CoreError> {
    let rows = match cursor {
        None => {
            sqlx::query(
                r#"
                SELECT id, trader_id, exchange_id, asset, quote_asset, quantity,
                       entry_source_id, entry_source_type, entry_price, entry_time_ms,
                       exit_source_id, exit_source_type, exit_price, exit_time_ms,
                       weight, score
                FROM trades
                WHERE trader_id = ? AND exit_time_ms >= ? AND exit_time_ms <= ?
                ORDER BY exit_time_ms ASC, id ASC
                LIMIT ?
                "#,
            )
            .bind(trader_id.as_str())
            .bind(start_time.as_i64())
            .bind(end_time.as_i64())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
        Some(c) => {
            sqlx::query(
                r#"
                SELECT id, trader_id, exchange_id, asset, quote_asset, quantity,
                       entry_source_id, entry_source_type, entry_price, entry_time_ms,
                       exit_source_id, exit_source_type, exit_price, exit_time_ms,
                       weight, score
                FROM trades
                WHERE trader_id = ?
                  AND (exit_time_ms > ? OR (exit_time_ms = ? AND id > ?))
                  AND exit_time_ms <= ?
                ORDER BY exit_time_ms ASC, id ASC
                LIMIT ?
                "#,
            )
            .bind(trader_id.as_str())
            .bind(c.time.as_i64())
            .bind(c.time.as_i64())
            .bind(c.row_id)
            .bind(end_time.as_i64())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?
        }
    };

    rows.iter()
        .map(|row| Ok((row.get::<i64, _>("id"), from_row(row)?)))
        .collect()
}

/// Exit time of the trader's earliest trade, if any.
pub async fn first_exit_time(
    conn: &mut SqliteConnection,
    trader_id: &TraderId,
) -> Result<Option<TimeMs>, CoreError> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MIN(exit_time_ms) FROM trades WHERE trader_id = ?")
            .bind(trader_id.as_str())
            .fetch_one(&mut *conn)
            .await?;
    Ok(row.0.map(TimeMs::new))
}

/// Replace a trade's weight and score after a rescore pass.
pub async fn update_scoring(
    conn: &mut SqliteConnection,
    row_id: i64,
    weight: Decimal,
    score: Decimal,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE trades SET weight = ?, score = ? WHERE id = ?")
        .bind(weight.to_canonical_string())
        .bind(score.to_canonical_string())
        .bind(row_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn from_row(row: &SqliteRow) -> Result<Trade, CoreError> {
    let entry_type_str: String = row.get("entry_source_type");
    let entry_source_type = SourceType::parse(&entry_type_str).ok_or_else(|| {
        CoreError::UnexpectedState(format!("unknown entry source type: {:?}", entry_type_str))
    })?;
    let exit_type_str: String = row.get("exit_source_type");
    let exit_source_type = SourceType::parse(&exit_type_str).ok_or_else(|| {
        CoreError::UnexpectedState(format!("unknown exit source type: {:?}", exit_type_str))
    })?;

    let quantity_str: String = row.get("quantity");
    let entry_price_str: String = row.get("entry_price");
    let exit_price_str: String = row.get("exit_price");
    let weight_str: String = row.get("weight");
    let score_str: String = row.get("score");

    Ok(Trade {
        trader_id: TraderId::new(row.get::<String, _>("trader_id")),
        exchange_id: ExchangeId::new(row.get::<String, _>("exchange_id")),
        asset: Asset::new(row.get::<String, _>("asset")),
        quote_asset: Asset::new(row.get::<String, _>("quote_asset")),
        quantity: decimal_col("quantity", &quantity_str)?,
        entry: TradeEntry {
            source_id: row.get("entry_source_id"),
            source_type: entry_source_type,
            price: decimal_col("entry_price", &entry_price_str)?,
            time: TimeMs::new(row.get("entry_time_ms")),
        },
        exit: TradeExit {
            source_id: row.get("exit_source_id"),
            source_type: exit_source_type,
            price: decimal_col("exit_price", &exit_price_str)?,
            time: TimeMs::new(row.get("exit_time_ms")),
        },
        weight: decimal_col("weight", &weight_str)?,
        score: decimal_col("score", &score_str)?,
    })
}
