use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use traderscore::config::PeriodConfig;
use traderscore::db::repo::{scores, trades};
use traderscore::db::{init_db, Repository};
use traderscore::domain::{
    Asset, Decimal, ExchangeId, Period, ScoreEntry, SourceType, TimeMs, Trade, TradeEntry,
    TradeExit, TraderId,
};
use traderscore::engine::scorer::ONE_DAY_MS;
use traderscore::orchestration::{EventBus, ScoreService, UnitOfWork};
use traderscore::{RankingCache, ScoreLocks};

struct TestStack {
    pool: SqlitePool,
    service: ScoreService,
    cache: Arc<RankingCache>,
    bus: EventBus,
    _temp: TempDir,
}

async fn setup() -> TestStack {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let cache = Arc::new(RankingCache::new());
    let locks = Arc::new(ScoreLocks::new(1000, 5, 10));
    let service = ScoreService::new(
        locks,
        Arc::clone(&cache),
        vec![PeriodConfig {
            id: "day".to_string(),
            duration_ms: ONE_DAY_MS,
        }],
        3,
    );

    TestStack {
        pool,
        service,
        cache,
        bus: EventBus::default(),
        _temp: temp_dir,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn seed_score(pool: &SqlitePool, trader: &TraderId, period: &Period, score: &str, time_ms: i64) {
    let mut conn = pool.acquire().await.unwrap();
    scores::upsert(
        &mut conn,
        &ScoreEntry {
            trader_id: trader.clone(),
            period: period.clone(),
            score: dec(score),
            time: TimeMs::new(time_ms),
        },
    )
    .await
    .unwrap();
}

fn scored_trade(trader: &TraderId, exit_id: &str, score: &str, entry_ms: i64, exit_ms: i64) -> Trade {
    Trade {
        trader_id: trader.clone(),
        exchange_id: ExchangeId::new("binance"),
        asset: Asset::new("ETH"),
        quote_asset: Asset::new("BTC"),
        quantity: dec("1"),
        entry: TradeEntry {
            source_id: format!("{}-entry", exit_id),
            source_type: SourceType::Order,
            price: dec("1"),
            time: TimeMs::new(entry_ms),
        },
        exit: TradeExit {
            source_id: exit_id.to_string(),
            source_type: SourceType::Order,
            price: dec("1"),
            time: TimeMs::new(exit_ms),
        },
        weight: dec("1"),
        score: dec(score),
    }
}

#[tokio::test]
async fn test_increment_on_empty_chain_compounds_from_one() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let global = Period::global();

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let score = stack
        .service
        .increment_score(&mut uow, &trader, &global, dec("25"), TimeMs::new(1000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    assert_eq!(score, dec("1.25"));
    let repo = Repository::new(stack.pool.clone());
    let latest = repo.latest_score(&trader, &global).await.unwrap().unwrap();
    assert_eq!(latest.score, dec("1.25"));
    assert_eq!(latest.time, TimeMs::new(1000));
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("1.25")));
}

#[tokio::test]
async fn test_retroactive_increment_preserves_suffix_ratios() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let global = Period::global();

    seed_score(&stack.pool, &trader, &global, "50", 1000).await;
    seed_score(&stack.pool, &trader, &global, "81", 3000).await;

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let at_insert = stack
        .service
        .increment_score(&mut uow, &trader, &global, dec("25"), TimeMs::new(2000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    // 50 * 1.25 = 62.5; the entry at 3000 keeps its 81/50 = 1.62 ratio
    assert_eq!(at_insert, dec("62.5"));
    let mut conn = stack.pool.acquire().await.unwrap();
    let chain = scores::history(
        &mut conn,
        &trader,
        &global,
        TimeMs::new(0),
        TimeMs::new(i64::MAX),
        10,
    )
    .await
    .unwrap();
    let values: Vec<(i64, Decimal)> = chain.iter().map(|e| (e.time.as_i64(), e.score)).collect();
    assert_eq!(
        values,
        vec![
            (1000, dec("50")),
            (2000, dec("62.5")),
            (3000, dec("101.25")),
        ]
    );

    // the cache tracks the latest entry, not the insertion point
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("101.25")));
}

#[tokio::test]
async fn test_rollback_restores_the_ranking_cache() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let global = Period::global();

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    stack
        .service
        .increment_score(&mut uow, &trader, &global, dec("25"), TimeMs::new(1000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("1.25")));

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    stack
        .service
        .increment_score(&mut uow, &trader, &global, dec("100"), TimeMs::new(2000))
        .await
        .unwrap();
    // mid-flight the cache already shows the new value
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("2.5")));
    uow.rollback().await.unwrap();

    assert_eq!(stack.cache.get(&global, &trader), Some(dec("1.25")));
    let repo = Repository::new(stack.pool.clone());
    let latest = repo.latest_score(&trader, &global).await.unwrap().unwrap();
    assert_eq!(latest.time, TimeMs::new(1000));
}

#[tokio::test]
async fn test_increment_scores_touches_every_period() {
    let stack = setup().await;
    let trader = TraderId::new("alice");

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    stack
        .service
        .increment_scores(&mut uow, &trader, dec("10"), TimeMs::new(1000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    assert_eq!(
        stack.cache.get(&Period::global(), &trader),
        Some(dec("1.1"))
    );
    assert_eq!(
        stack.cache.get(&Period::new("day"), &trader),
        Some(dec("1.1"))
    );
}

#[tokio::test]
async fn test_unknown_period_is_rejected() {
    let stack = setup().await;
    let trader = TraderId::new("alice");

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let result = stack
        .service
        .calculate_score(&mut uow, &trader, &Period::new("fortnight"), TimeMs::new(1000))
        .await;
    assert!(result.is_err());
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn test_calculate_score_rebuilds_global_chain_from_trades() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let global = Period::global();

    {
        let mut conn = stack.pool.acquire().await.unwrap();
        // more trades than the page size of 3, so pagination is exercised
        for (i, score) in ["25", "-10", "0", "50", "10"].iter().enumerate() {
            let t = scored_trade(
                &trader,
                &format!("x{}", i),
                score,
                1000 + i as i64 * 1000,
                2000 + i as i64 * 1000,
            );
            assert!(trades::insert(&mut conn, &t).await.unwrap());
        }
        // stale chain entry that the recompute must overwrite
        scores::upsert(
            &mut conn,
            &ScoreEntry {
                trader_id: trader.clone(),
                period: global.clone(),
                score: dec("999"),
                time: TimeMs::new(2000),
            },
        )
        .await
        .unwrap();
    }

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let final_score = stack
        .service
        .calculate_score(&mut uow, &trader, &global, TimeMs::new(10_000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    // 1 * 1.25 * 0.9 * 1 * 1.5 * 1.1 = 1.85625
    assert_eq!(final_score, dec("1.85625"));

    let mut conn = stack.pool.acquire().await.unwrap();
    let chain = scores::history(
        &mut conn,
        &trader,
        &global,
        TimeMs::new(0),
        TimeMs::new(i64::MAX),
        10,
    )
    .await
    .unwrap();
    assert_eq!(chain.len(), 5);
    assert_eq!(chain[0].score, dec("1.25"));
    assert_eq!(chain[1].score, dec("1.125"));
    assert_eq!(chain[4].score, dec("1.85625"));
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("1.85625")));
}

#[tokio::test]
async fn test_calculate_score_keeps_equal_exit_times_across_page_boundaries() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let global = Period::global();

    {
        let mut conn = stack.pool.acquire().await.unwrap();
        // five trades sharing one exit time, spanning the page size of 3
        for i in 0..5 {
            let t = scored_trade(&trader, &format!("x{}", i), "10", 4000, 5000);
            assert!(trades::insert(&mut conn, &t).await.unwrap());
        }
    }

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let final_score = stack
        .service
        .calculate_score(&mut uow, &trader, &global, TimeMs::new(10_000))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    // all five compound: 1.1^5
    assert_eq!(final_score, dec("1.61051"));
    assert_eq!(stack.cache.get(&global, &trader), Some(dec("1.61051")));

    let mut conn = stack.pool.acquire().await.unwrap();
    let chain = scores::history(
        &mut conn,
        &trader,
        &global,
        TimeMs::new(0),
        TimeMs::new(i64::MAX),
        10,
    )
    .await
    .unwrap();
    // one chain entry per distinct exit time, holding the cumulative value
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].time, TimeMs::new(5000));
    assert_eq!(chain[0].score, dec("1.61051"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_serialize_into_one_chain() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let cache = Arc::new(RankingCache::new());
    // generous retry budget; contention is the point here
    let locks = Arc::new(ScoreLocks::new(10_000, 200, 5));
    let service = Arc::new(ScoreService::new(locks, Arc::clone(&cache), Vec::new(), 50));
    let bus = EventBus::default();
    let trader = TraderId::new("alice");
    let global = Period::global();

    let mut handles = Vec::new();
    for i in 0..4i64 {
        let service = Arc::clone(&service);
        let pool = pool.clone();
        let bus = bus.clone();
        let trader = trader.clone();
        let global = global.clone();
        handles.push(tokio::spawn(async move {
            let mut uow = UnitOfWork::begin(&pool).await.unwrap();
            service
                .increment_score(&mut uow, &trader, &global, dec("10"), TimeMs::new(1000 + i))
                .await
                .unwrap();
            uow.commit(&bus).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // every increment landed exactly once, whatever the commit order: 1.1^4
    let mut conn = pool.acquire().await.unwrap();
    let chain = scores::history(
        &mut conn,
        &trader,
        &global,
        TimeMs::new(0),
        TimeMs::new(i64::MAX),
        10,
    )
    .await
    .unwrap();
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[3].score, dec("1.4641"));
    assert_eq!(cache.get(&global, &trader), Some(dec("1.4641")));
}

#[tokio::test]
async fn test_calculate_score_drops_entries_outside_the_window() {
    let stack = setup().await;
    let trader = TraderId::new("alice");
    let day = Period::new("day");
    let now = 10 * ONE_DAY_MS;

    // one old entry outside the window, one trade inside it
    seed_score(&stack.pool, &trader, &day, "7", ONE_DAY_MS).await;
    {
        let mut conn = stack.pool.acquire().await.unwrap();
        let t = scored_trade(&trader, "x1", "25", now - 2000, now - 1000);
        trades::insert(&mut conn, &t).await.unwrap();
    }

    let mut uow = UnitOfWork::begin(&stack.pool).await.unwrap();
    let final_score = stack
        .service
        .calculate_score(&mut uow, &trader, &day, TimeMs::new(now))
        .await
        .unwrap();
    uow.commit(&stack.bus).await.unwrap();

    assert_eq!(final_score, dec("1.25"));
    let mut conn = stack.pool.acquire().await.unwrap();
    let chain = scores::history(
        &mut conn,
        &trader,
        &day,
        TimeMs::new(0),
        TimeMs::new(i64::MAX),
        10,
    )
    .await
    .unwrap();
    let times: Vec<i64> = chain.iter().map(|e| e.time.as_i64()).collect();
    assert_eq!(times, vec![now - 1000]);
}
