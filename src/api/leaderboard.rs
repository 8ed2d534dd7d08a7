use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::api::{parse_period, AppState};
use crate::domain::TraderId;
use crate::error::AppError;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub period: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub trader_id: String,
    pub score: String,
}

pub async fn get_leaderboard(
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let period = parse_period(&state, params.period.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let entries = state
        .cache
        .top(&period, limit)
        .into_iter()
        .map(|ranked| LeaderboardEntry {
            rank: ranked.rank,
            trader_id: ranked.trader_id.as_str().to_string(),
            score: ranked.score.to_canonical_string(),
        })
        .collect();

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RanksQuery {
    /// Comma-separated trader ids.
    pub traders: String,
    pub period: Option<String>,
}

pub async fn get_ranks(
    Query(params): Query<RanksQuery>,
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, Option<u64>>>, AppError> {
    let period = parse_period(&state, params.period.as_deref())?;

    let traders: Vec<&str> = params
        .traders
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if traders.is_empty() {
        return Err(AppError::BadRequest(
            "traders must list at least one trader id".to_string(),
        ));
    }

    let ranks = traders
        .into_iter()
        .map(|id| {
            let rank = state.cache.rank_of(&period, &TraderId::new(id));
            (id.to_string(), rank)
        })
        .collect();

    Ok(Json(ranks))
}
