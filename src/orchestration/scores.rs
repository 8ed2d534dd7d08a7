//! Score ledger orchestration: compounding updates and full recomputes.

use crate::config::PeriodConfig;
use crate::db::repo::{scores, trades};
use crate::domain::{Decimal, Period, ScoreEntry, TimeMs, TraderId};
use crate::engine::matcher::PageCursor;
use crate::error::CoreError;
use crate::locks::ScoreLocks;
use crate::orchestration::uow::UnitOfWork;
use crate::ranking::RankingCache;
use std::sync::Arc;
use tracing::debug;

/// Applies score deltas and recomputes, serialized per (trader, period).
pub struct ScoreService {
    locks: Arc<ScoreLocks>,
    cache: Arc<RankingCache>,
    periods: Vec<PeriodConfig>,
    trade_fetch_limit: i64,
}

impl ScoreService {
    pub fn new(
        locks: Arc<ScoreLocks>,
        cache: Arc<RankingCache>,
        periods: Vec<PeriodConfig>,
        trade_fetch_limit: i64,
    ) -> Self {
        ScoreService {
            locks,
            cache,
            periods,
            trade_fetch_limit,
        }
    }

    pub fn periods(&self) -> &[PeriodConfig] {
        &self.periods
    }

    /// Every period this service scores: global plus the configured ones.
    pub fn all_periods(&self) -> Vec<Period> {
        let mut all = vec![Period::global()];
        all.extend(self.periods.iter().map(|p| Period::new(p.id.clone())));
        all
    }

    /// Window length for a period; None means all time.
    fn period_duration_ms(&self, period: &Period) -> Result<Option<i64>, CoreError> {
        if period.is_global() {
            return Ok(None);
        }
        self.periods
            .iter()
            .find(|p| p.id == period.as_str())
            .map(|p| Some(p.duration_ms))
            .ok_or_else(|| {
                CoreError::Validation(format!("unknown score period: {}", period))
            })
    }

    /// Hold the (trader, period) lock for the rest of the unit of work.
    ///
    /// Repeat acquisitions within one unit of work are no-ops, so a single
    /// transaction touching the same chain several times cannot deadlock on
    /// itself.
    async fn lock_chain(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        period: &Period,
    ) -> Result<(), CoreError> {
        if uow.holds_score_lock(trader_id, period) {
            return Ok(());
        }
        let guard = self.locks.acquire(trader_id, period).await?;
        uow.retain_score_lock(trader_id.clone(), period.clone(), guard);
        Ok(())
    }

    /// Apply a delta to every period's chain at `time`.
    pub async fn increment_scores(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        delta: Decimal,
        time: TimeMs,
    ) -> Result<(), CoreError> {
        for period in self.all_periods() {
            self.increment_score(uow, trader_id, &period, delta, time)
                .await?;
        }
        Ok(())
    }

    /// Compound the chain at `time` by `delta` percent.
    ///
    /// Entries after `time` are recomputed preserving each one's
    /// multiplicative ratio to its predecessor, so a retroactive insert
    /// shifts the whole suffix consistently. Returns the new score at `time`.
    pub async fn increment_score(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        period: &Period,
        delta: Decimal,
        time: TimeMs,
    ) -> Result<Decimal, CoreError> {
        self.lock_chain(uow, trader_id, period).await?;

        let base = scores::latest_at_or_before(uow.conn(), trader_id, period, time)
            .await?
            .map(|e| e.score)
            .unwrap_or_else(Decimal::one);
        let new_score = base.compound(delta);

        let future = scores::entries_after_asc(uow.conn(), trader_id, period, time).await?;

        let mut updated = vec![ScoreEntry {
            trader_id: trader_id.clone(),
            period: period.clone(),
            score: new_score,
            time,
        }];

        let mut prev_original = base;
        let mut prev_updated = new_score;
        for entry in future {
            let ratio = entry.score.ratio_to(prev_original).ok_or_else(|| {
                CoreError::UnexpectedState(format!(
                    "zero score in chain for {}/{} at {}",
                    trader_id,
                    period,
                    entry.time.as_i64()
                ))
            })?;
            let rescored = ratio * prev_updated;
            prev_original = entry.score;
            prev_updated = rescored;
            updated.push(ScoreEntry {
                trader_id: trader_id.clone(),
                period: period.clone(),
                score: rescored,
                time: entry.time,
            });
        }

        debug!(
            trader_id = %trader_id,
            period = %period,
            delta = %delta,
            rewritten = updated.len() - 1,
            "applying score increment"
        );

        for entry in &updated {
            self.apply_entry(uow, entry).await?;
        }

        Ok(new_score)
    }

    /// Recompute every period's chain from the trade history.
    pub async fn calculate_scores(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        now: TimeMs,
    ) -> Result<(), CoreError> {
        for period in self.all_periods() {
            self.calculate_score(uow, trader_id, &period, now).await?;
        }
        Ok(())
    }

    /// Full from-scratch recompute of one (trader, period) chain.
    ///
    /// Drops entries that fell out of the period's window, then compounds
    /// trade scores in ascending exit order, persisting the running value per
    /// trade. Idempotent; used as the repair/backfill path and by the
    /// schedule worker when a trade exits a period's window.
    pub async fn calculate_score(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        period: &Period,
        now: TimeMs,
    ) -> Result<Decimal, CoreError> {
        let duration = self.period_duration_ms(period)?;
        self.lock_chain(uow, trader_id, period).await?;

        let start = match duration {
            None => TimeMs::new(0),
            Some(d) => TimeMs::new(now.as_i64().saturating_sub(d)),
        };

        let removed = scores::remove_before(uow.conn(), trader_id, period, start).await?;
        if removed > 0 {
            debug!(
                trader_id = %trader_id,
                period = %period,
                removed,
                "dropped score entries outside period window"
            );
        }

        let mut score = Decimal::one();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = trades::page_asc(
                uow.conn(),
                trader_id,
                start,
                now,
                cursor.as_ref(),
                self.trade_fetch_limit,
            )
            .await?;
            let Some((last_id, last)) = page.last() else {
                break;
            };
            cursor = Some(PageCursor {
                time: last.exit.time,
                row_id: *last_id,
            });

            let page_len = page.len() as i64;
            for (_, trade) in &page {
                score = score.compound(trade.score);
                self.apply_entry(
                    uow,
                    &ScoreEntry {
                        trader_id: trader_id.clone(),
                        period: period.clone(),
                        score,
                        time: trade.exit.time,
                    },
                )
                .await?;
            }

            if page_len < self.trade_fetch_limit {
                break;
            }
        }

        Ok(score)
    }

    /// Persist one chain entry and, when it is the latest for its key, push
    /// it into the ranking cache with a rollback compensation.
    async fn apply_entry(
        &self,
        uow: &mut UnitOfWork,
        entry: &ScoreEntry,
    ) -> Result<(), CoreError> {
        scores::upsert(uow.conn(), entry).await?;

        if scores::is_latest(uow.conn(), &entry.trader_id, &entry.period, entry.time).await? {
            let previous = self.cache.get(&entry.period, &entry.trader_id);
            self.cache
                .upsert(&entry.period, &entry.trader_id, entry.score);

            let cache = Arc::clone(&self.cache);
            let period = entry.period.clone();
            let trader_id = entry.trader_id.clone();
            uow.on_abort(move || cache.restore(&period, &trader_id, previous));
        }

        Ok(())
    }
}
