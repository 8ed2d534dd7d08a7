use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{parse_period, AppState};
use crate::domain::{Period, TimeMs, TraderId};
use crate::error::AppError;

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderResponse {
    pub trader_id: String,
    pub score: String,
    pub rank: Option<u64>,
}

pub async fn get_trader(
    Path(trader_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TraderResponse>, AppError> {
    let trader_id = TraderId::new(trader_id);
    let period = Period::global();

    let latest = state
        .repo
        .latest_score(&trader_id, &period)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no scores for trader {}", trader_id)))?;

    Ok(Json(TraderResponse {
        trader_id: trader_id.as_str().to_string(),
        score: latest.score.to_canonical_string(),
        rank: state.cache.rank_of(&period, &trader_id),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreHistoryQuery {
    pub period: Option<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreHistoryEntry {
    pub score: String,
    pub time_ms: i64,
}

pub async fn get_score_history(
    Path(trader_id): Path<String>,
    Query(params): Query<ScoreHistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ScoreHistoryEntry>>, AppError> {
    let period = parse_period(&state, params.period.as_deref())?;

    let start = TimeMs::new(params.start_ms.unwrap_or(0));
    let end = TimeMs::new(params.end_ms.unwrap_or(i64::MAX));
    if start > end {
        return Err(AppError::BadRequest("startMs must be <= endMs".to_string()));
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let entries = state
        .repo
        .score_history(&TraderId::new(trader_id), &period, start, end, limit)
        .await?
        .into_iter()
        .map(|entry| ScoreHistoryEntry {
            score: entry.score.to_canonical_string(),
            time_ms: entry.time.as_i64(),
        })
        .collect();

    Ok(Json(entries))
}
