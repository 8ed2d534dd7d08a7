//! Unit of work: one transaction, one terminal outcome.
//!
//! Wraps a SQLite transaction together with two buffers: domain events to
//! flush on commit, and compensation closures to run (in reverse order) on
//! rollback. `commit` and `rollback` both consume the value, so firing both
//! outcomes, or raising events after the outcome, cannot compile.

use crate::domain::{DomainEvent, Period, TraderId};
use crate::error::CoreError;
use crate::locks::ScoreLockGuard;
use crate::orchestration::events::EventBus;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::Transaction;
use std::collections::HashMap;

type Compensation = Box<dyn FnOnce() + Send>;

pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    events: Vec<DomainEvent>,
    compensations: Vec<Compensation>,
    score_locks: HashMap<(TraderId, Period), ScoreLockGuard>,
}

impl UnitOfWork {
    /// Open a transaction on the pool.
    pub async fn begin(pool: &SqlitePool) -> Result<Self, CoreError> {
        Ok(UnitOfWork {
            tx: pool.begin().await?,
            events: Vec::new(),
            compensations: Vec::new(),
            score_locks: HashMap::new(),
        })
    }

    /// The transaction's connection, for repository calls.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Buffer a domain event for publication on commit.
    pub fn raise(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Register an undo for a non-transactional side effect, to run only if
    /// this unit of work rolls back.
    pub fn on_abort(&mut self, compensation: impl FnOnce() + Send + 'static) {
        self.compensations.push(Box::new(compensation));
    }

    /// Whether this unit of work already holds the score lock for a key.
    pub fn holds_score_lock(&self, trader_id: &TraderId, period: &Period) -> bool {
        self.score_locks
            .contains_key(&(trader_id.clone(), period.clone()))
    }

    /// Keep a score lock held until this unit of work reaches its outcome.
    ///
    /// A chain read serialized by the lock is only safe if the lock outlives
    /// the transaction that rewrites the chain; releasing before commit would
    /// let a concurrent writer read the pre-commit state.
    pub fn retain_score_lock(
        &mut self,
        trader_id: TraderId,
        period: Period,
        guard: ScoreLockGuard,
    ) {
        self.score_locks.insert((trader_id, period), guard);
    }

    /// Commit the transaction, discard compensations, flush events.
    pub async fn commit(self, bus: &EventBus) -> Result<(), CoreError> {
        let UnitOfWork {
            tx,
            events,
            compensations,
            score_locks,
        } = self;

        tx.commit().await?;
        drop(compensations);
        drop(score_locks);
        for event in events {
            bus.publish(event);
        }
        Ok(())
    }

    /// Roll the transaction back, run compensations in reverse registration
    /// order, discard buffered events.
    ///
    /// Compensations run even when the rollback itself errors; the cache
    /// must not keep effects of an abandoned transaction either way.
    pub async fn rollback(self) -> Result<(), CoreError> {
        let UnitOfWork {
            tx,
            events: _,
            mut compensations,
            score_locks,
        } = self;

        let result = tx.rollback().await;
        while let Some(compensation) = compensations.pop() {
            compensation();
        }
        drop(score_locks);
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{
        Asset, Decimal, DomainEvent, ExchangeId, SourceType, TimeMs, Trade, TradeEntry,
        TradeExit, TraderId,
    };
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir)
    }

    fn sample_trade() -> Trade {
        Trade {
            trader_id: TraderId::new("t1"),
            exchange_id: ExchangeId::new("binance"),
            asset: Asset::new("ETH"),
            quote_asset: Asset::new("BTC"),
            quantity: Decimal::from_str("1").unwrap(),
            entry: TradeEntry {
                source_id: "e".to_string(),
                source_type: SourceType::Order,
                price: Decimal::from_str("1").unwrap(),
                time: TimeMs::new(1),
            },
            exit: TradeExit {
                source_id: "x".to_string(),
                source_type: SourceType::Order,
                price: Decimal::from_str("1").unwrap(),
                time: TimeMs::new(2),
            },
            weight: Decimal::from_str("1").unwrap(),
            score: Decimal::from_str("1").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_commit_flushes_events_and_skips_compensations() {
        let (pool, _temp) = setup_pool().await;
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let ran = Arc::new(AtomicUsize::new(0));

        let mut uow = UnitOfWork::begin(&pool).await.unwrap();
        uow.raise(DomainEvent::TradeCreated(sample_trade()));
        let ran_clone = Arc::clone(&ran);
        uow.on_abort(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        uow.commit(&bus).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(DomainEvent::TradeCreated(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rollback_runs_compensations_in_reverse_and_drops_events() {
        let (pool, _temp) = setup_pool().await;
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let order: Arc<parking_lot::Mutex<Vec<&'static str>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut uow = UnitOfWork::begin(&pool).await.unwrap();
        uow.raise(DomainEvent::TradeCreated(sample_trade()));
        let first = Arc::clone(&order);
        uow.on_abort(move || first.lock().push("first"));
        let second = Arc::clone(&order);
        uow.on_abort(move || second.lock().push("second"));

        uow.rollback().await.unwrap();

        assert_eq!(*order.lock(), vec!["second", "first"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (pool, _temp) = setup_pool().await;

        let mut uow = UnitOfWork::begin(&pool).await.unwrap();
        sqlx::query("INSERT INTO position_entries (trader_id, exchange_id, asset, quantity, time_ms) VALUES ('t1', 'e1', 'BTC', '1', 1)")
            .execute(uow.conn())
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM position_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
