use axum::http::StatusCode;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;
use traderscore::api::{self, AppState};
use traderscore::db::repo::scores;
use traderscore::db::{init_db, Repository};
use traderscore::domain::{Decimal, Period, ScoreEntry, TimeMs, TraderId};
use traderscore::RankingCache;

struct TestApp {
    app: axum::Router,
    pool: SqlitePool,
    cache: Arc<RankingCache>,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool.clone()));
    let cache = Arc::new(RankingCache::new());
    let app = api::create_router(AppState {
        repo,
        cache: Arc::clone(&cache),
        period_ids: vec!["day".to_string()],
    });

    TestApp {
        app,
        pool,
        cache,
        _temp: temp_dir,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn seed_score(pool: &SqlitePool, trader: &str, score: &str, time_ms: i64) {
    let mut conn = pool.acquire().await.unwrap();
    scores::upsert(
        &mut conn,
        &ScoreEntry {
            trader_id: TraderId::new(trader),
            period: Period::global(),
            score: dec(score),
            time: TimeMs::new(time_ms),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = setup_test_app().await;
    let (status, body) = get(&test.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_leaderboard_orders_by_score() {
    let test = setup_test_app().await;
    let global = Period::global();
    test.cache.upsert(&global, &TraderId::new("alice"), dec("3"));
    test.cache.upsert(&global, &TraderId::new("bob"), dec("2"));
    test.cache.upsert(&global, &TraderId::new("carol"), dec("1.5"));

    let (status, body) = get(&test.app, "/v1/leaderboard").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["traderId"], "alice");
    assert_eq!(entries[0]["rank"], 1);
    assert_eq!(entries[0]["score"], "3");
    assert_eq!(entries[2]["traderId"], "carol");

    let (status, body) = get(&test.app, "/v1/leaderboard?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_leaderboard_rejects_unknown_period() {
    let test = setup_test_app().await;
    let (status, _) = get(&test.app, "/v1/leaderboard?period=fortnight").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // configured periods and the implicit global period are accepted
    let (status, _) = get(&test.app, "/v1/leaderboard?period=day").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&test.app, "/v1/leaderboard?period=global").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_ranks_endpoint() {
    let test = setup_test_app().await;
    let global = Period::global();
    test.cache.upsert(&global, &TraderId::new("alice"), dec("3"));
    test.cache.upsert(&global, &TraderId::new("bob"), dec("2"));

    let (status, body) = get(&test.app, "/v1/ranks?traders=alice,bob,ghost").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alice"], 1);
    assert_eq!(body["bob"], 2);
    assert!(body["ghost"].is_null());

    let (status, _) = get(&test.app, "/v1/ranks?traders=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trader_detail() {
    let test = setup_test_app().await;

    let (status, _) = get(&test.app, "/v1/traders/alice").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    seed_score(&test.pool, "alice", "2.5", 1000).await;
    test.cache
        .upsert(&Period::global(), &TraderId::new("alice"), dec("2.5"));

    let (status, body) = get(&test.app, "/v1/traders/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["traderId"], "alice");
    assert_eq!(body["score"], "2.5");
    assert_eq!(body["rank"], 1);
}

#[tokio::test]
async fn test_score_history() {
    let test = setup_test_app().await;
    seed_score(&test.pool, "alice", "1.25", 1000).await;
    seed_score(&test.pool, "alice", "1.5", 2000).await;
    seed_score(&test.pool, "alice", "1.8", 3000).await;

    let (status, body) = get(&test.app, "/v1/traders/alice/scores").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["score"], "1.25");
    assert_eq!(entries[0]["timeMs"], 1000);
    assert_eq!(entries[2]["score"], "1.8");

    let (status, body) = get(&test.app, "/v1/traders/alice/scores?startMs=1500&endMs=2500").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = get(&test.app, "/v1/traders/alice/scores?startMs=2&endMs=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
