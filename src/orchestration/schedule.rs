//! Periodic re-score scheduling.
//!
//! A committed trade contributes to every windowed period's score; once its
//! exit time leaves a window, that period's chain must be recomputed. The
//! trade watcher queues one schedule entry per windowed period at commit
//! time; the due worker later runs the full recompute.

use crate::config::PeriodConfig;
use crate::db::repo::schedule;
use crate::domain::{DomainEvent, Period, TimeMs, Trade};
use crate::error::CoreError;
use crate::orchestration::events::EventBus;
use crate::orchestration::scores::ScoreService;
use crate::orchestration::uow::UnitOfWork;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Subscribe to committed trades and queue re-score triggers for every
/// windowed period. The global period has no window and is never queued.
pub fn spawn_trade_watcher(
    bus: &EventBus,
    pool: SqlitePool,
    periods: Vec<PeriodConfig>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DomainEvent::TradeCreated(trade)) => {
                    if let Err(e) = schedule_for_trade(&pool, &periods, &trade).await {
                        warn!(
                            trader_id = %trade.trader_id,
                            error = %e,
                            "failed to queue score update schedule"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "trade watcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn schedule_for_trade(
    pool: &SqlitePool,
    periods: &[PeriodConfig],
    trade: &Trade,
) -> Result<(), CoreError> {
    let mut conn = pool.acquire().await?;
    for period in periods {
        let due_time = TimeMs::new(trade.exit.time.as_i64() + period.duration_ms);
        schedule::insert(
            &mut conn,
            &trade.trader_id,
            &Period::new(period.id.clone()),
            due_time,
        )
        .await?;
    }
    Ok(())
}

/// Process due schedule entries: one transaction per entry, recompute the
/// period's chain, remove the entry. Returns how many entries were handled.
pub async fn process_due(
    pool: &SqlitePool,
    scores: &ScoreService,
    bus: &EventBus,
    now: TimeMs,
    batch_limit: i64,
) -> Result<usize, CoreError> {
    let due = {
        let mut conn = pool.acquire().await?;
        schedule::due(&mut conn, now, batch_limit).await?
    };

    let mut processed = 0usize;
    for entry in &due {
        let mut uow = UnitOfWork::begin(pool).await?;
        let result = {
            match scores
                .calculate_score(&mut uow, &entry.trader_id, &entry.period, now)
                .await
            {
                Ok(_) => schedule::complete(uow.conn(), entry.id).await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                uow.commit(bus).await?;
                processed += 1;
            }
            Err(e) => {
                warn!(
                    trader_id = %entry.trader_id,
                    period = %entry.period,
                    error = %e,
                    "scheduled score update failed"
                );
                if let Err(rb) = uow.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
            }
        }
    }

    if processed > 0 {
        debug!(processed, "processed due score updates");
    }
    Ok(processed)
}

/// Poll for due schedule entries at a fixed interval.
pub fn spawn_due_worker(
    pool: SqlitePool,
    scores: Arc<ScoreService>,
    bus: EventBus,
    poll_interval: Duration,
    batch_limit: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = process_due(&pool, &scores, &bus, TimeMs::now(), batch_limit).await {
                warn!(error = %e, "due score update pass failed");
            }
        }
    })
}
