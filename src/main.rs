use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use traderscore::orchestration::{schedule, EventBus, ScoreService};
use traderscore::{api, config::Config, db::init_db, RankingCache, Repository, ScoreLocks};

const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_secs(30);
const SCHEDULE_BATCH_LIMIT: i64 = 100;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool.clone()));
    let cache = Arc::new(RankingCache::new());
    let locks = Arc::new(ScoreLocks::new(
        config.lock_ttl_ms,
        config.lock_max_attempts,
        config.lock_retry_wait_ms,
    ));
    let bus = EventBus::default();

    let scores = Arc::new(ScoreService::new(
        Arc::clone(&locks),
        Arc::clone(&cache),
        config.periods.clone(),
        config.trade_fetch_limit,
    ));

    // Background workers: queue re-score triggers on committed trades,
    // process them once due.
    schedule::spawn_trade_watcher(&bus, pool.clone(), config.periods.clone());
    schedule::spawn_due_worker(
        pool.clone(),
        Arc::clone(&scores),
        bus.clone(),
        SCHEDULE_POLL_INTERVAL,
        SCHEDULE_BATCH_LIMIT,
    );

    // Create router
    let app = api::create_router(api::AppState {
        repo,
        cache,
        period_ids: config.periods.iter().map(|p| p.id.clone()).collect(),
    });

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
