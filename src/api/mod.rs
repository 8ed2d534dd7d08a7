//! Read-only HTTP query surface over the score ledger and ranking cache.

pub mod health;
pub mod leaderboard;
pub mod traders;

use crate::db::Repository;
use crate::ranking::RankingCache;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub cache: Arc<RankingCache>,
    /// Configured period ids; `global` is always valid in addition.
    pub period_ids: Vec<String>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/v1/leaderboard", get(leaderboard::get_leaderboard))
        .route("/v1/ranks", get(leaderboard::get_ranks))
        .route("/v1/traders/:trader_id", get(traders::get_trader))
        .route(
            "/v1/traders/:trader_id/scores",
            get(traders::get_score_history),
        )
        .layer(cors)
        .with_state(state)
}

/// Parse an optional `period` query value, defaulting to global.
pub(crate) fn parse_period(
    state: &AppState,
    raw: Option<&str>,
) -> Result<crate::domain::Period, crate::error::AppError> {
    use crate::domain::{Period, GLOBAL_PERIOD};
    use crate::error::AppError;

    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    match raw {
        None => Ok(Period::global()),
        Some(GLOBAL_PERIOD) => Ok(Period::global()),
        Some(id) if state.period_ids.iter().any(|p| p == id) => Ok(Period::new(id)),
        Some(id) => Err(AppError::BadRequest(format!("unknown period: {}", id))),
    }
}
