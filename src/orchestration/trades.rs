//! Trade orchestration: match an outflow, price and score the results.

use crate::db::repo::{orders, portfolio, trades, transfers};
use crate::domain::{
    Asset, Decimal, DomainEvent, ExchangeId, SourceType, TimeMs, Trade, TradeEntry, TradeExit,
    TraderId,
};
use crate::engine::matcher::{DbInflowSource, EntryMatcher, MatchedEntry, PageCursor};
use crate::engine::scorer;
use crate::error::CoreError;
use crate::exchange::ExchangeGateway;
use crate::orchestration::scores::ScoreService;
use crate::orchestration::uow::UnitOfWork;
use std::sync::Arc;
use tracing::debug;

/// An outflow event to turn into trades.
#[derive(Debug, Clone)]
pub struct NewTradeRequest {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    /// The outflow's own source: an order or a withdrawal.
    pub source_id: String,
    pub source_type: SourceType,
    /// The asset flowing out.
    pub asset: Asset,
    pub exit_quantity: Decimal,
    pub exit_time: TimeMs,
    /// Skip weight/score computation (historical replay).
    pub disable_scoring: bool,
    /// Feed resulting trade scores into the score ledger.
    pub increment_scores: bool,
}

/// Creates trades from outflows inside the caller's unit of work.
pub struct TradeService {
    gateway: Arc<dyn ExchangeGateway>,
    scores: Arc<ScoreService>,
    matcher: EntryMatcher,
    num_recent_trades: i64,
    rescore_fetch_limit: i64,
    preferred_quote_asset: Asset,
}

impl TradeService {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        scores: Arc<ScoreService>,
        matcher: EntryMatcher,
        num_recent_trades: i64,
        rescore_fetch_limit: i64,
        preferred_quote_asset: Asset,
    ) -> Self {
        TradeService {
            gateway,
            scores,
            matcher,
            num_recent_trades,
            rescore_fetch_limit,
            preferred_quote_asset,
        }
    }

    /// Resolve the outflow against unused inflows and persist one trade per
    /// matched entry. The created trades' quantities sum exactly to
    /// `exit_quantity`.
    pub async fn new_trade(
        &self,
        uow: &mut UnitOfWork,
        req: &NewTradeRequest,
    ) -> Result<Vec<Trade>, CoreError> {
        validate(req)?;

        let entries = {
            // an order outflow must not consume its own inflow row
            let exclude_order = match req.source_type {
                SourceType::Order => Some(req.source_id.as_str()),
                _ => None,
            };
            let mut source = DbInflowSource::new(
                uow.conn(),
                &req.trader_id,
                &req.exchange_id,
                &req.asset,
                exclude_order,
            );
            self.matcher
                .resolve(&mut source, req.exit_quantity, req.exit_time)
                .await?
        };

        debug!(
            trader_id = %req.trader_id,
            asset = %req.asset,
            exit_quantity = %req.exit_quantity,
            entries = entries.len(),
            "outflow matched"
        );

        let mut created = Vec::with_capacity(entries.len());
        for entry in entries {
            let trade = self.create_trade_from_entry(uow, req, entry).await?;

            let inserted = trades::insert(uow.conn(), &trade).await?;
            if inserted {
                self.mark_source_used(uow, &trade).await?;
                uow.raise(DomainEvent::TradeCreated(trade.clone()));
            }
            created.push(trade);
        }

        if req.increment_scores {
            for trade in &created {
                self.scores
                    .increment_scores(uow, &trade.trader_id, trade.score, trade.exit.time)
                    .await?;
            }
        }

        Ok(created)
    }

    async fn create_trade_from_entry(
        &self,
        uow: &mut UnitOfWork,
        req: &NewTradeRequest,
        entry: MatchedEntry,
    ) -> Result<Trade, CoreError> {
        let quote_asset = self
            .matcher
            .resolve_quote_asset(
                &entry,
                self.gateway.as_ref(),
                &req.exchange_id,
                &req.asset,
                &self.preferred_quote_asset,
            )
            .await?;

        let entry_price = self
            .gateway
            .get_price(&req.exchange_id, &req.asset, &quote_asset, entry.time)
            .await?;
        let exit_price = self
            .gateway
            .get_price(&req.exchange_id, &req.asset, &quote_asset, req.exit_time)
            .await?;

        let (weight, score) = if req.disable_scoring {
            (Decimal::zero(), Decimal::zero())
        } else {
            let weight = self
                .trade_weight(
                    uow,
                    &req.trader_id,
                    &req.exchange_id,
                    &req.asset,
                    &quote_asset,
                    entry.quantity,
                    req.exit_time,
                    exit_price,
                )
                .await?;

            let change = scorer::trade_change(entry_price, exit_price).ok_or_else(|| {
                CoreError::UnexpectedState(format!(
                    "zero entry price for {}/{} at {}",
                    req.asset,
                    quote_asset,
                    entry.time.as_i64()
                ))
            })?;

            let recent =
                trades::recent(uow.conn(), &req.trader_id, req.exit_time, self.num_recent_trades)
                    .await?;
            let daily = scorer::daily_scores(&recent);

            let score = scorer::score(&scorer::ScoreInputs {
                trade_change: change,
                entry_time: entry.time,
                exit_time: req.exit_time,
                weight,
                daily_mean: scorer::mean(&daily),
                daily_std_dev: scorer::std_dev(&daily),
            });
            (weight, score)
        };

        Ok(Trade {
            trader_id: req.trader_id.clone(),
            exchange_id: req.exchange_id.clone(),
            asset: req.asset.clone(),
            quote_asset,
            quantity: entry.quantity,
            entry: TradeEntry {
                source_id: entry.source_id.clone(),
                source_type: entry.source_type(),
                price: entry_price,
                time: entry.time,
            },
            exit: TradeExit {
                source_id: req.source_id.clone(),
                source_type: req.source_type,
                price: exit_price,
                time: req.exit_time,
            },
            weight,
            score,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn trade_weight(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote_asset: &Asset,
        quantity: Decimal,
        exit_time: TimeMs,
        exit_price: Decimal,
    ) -> Result<Decimal, CoreError> {
        let trade_btc = self
            .gateway
            .get_btc_value(
                exchange_id,
                asset,
                quote_asset,
                quantity,
                exit_time,
                Some(exit_price),
            )
            .await?;
        let portfolio_btc = self.portfolio_btc_value(uow, trader_id, exit_time).await?;

        Ok(scorer::weight(trade_btc, portfolio_btc))
    }

    /// Value the trader's whole portfolio in BTC at `time`.
    async fn portfolio_btc_value(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        time: TimeMs,
    ) -> Result<Decimal, CoreError> {
        let snapshot = portfolio::snapshot_all(uow.conn(), trader_id, time).await?;

        let mut total = Decimal::zero();
        for item in snapshot {
            if item.quantity.is_zero() {
                continue;
            }
            let quote = if self
                .gateway
                .is_root_asset(&item.exchange_id, &item.asset)
                .await?
            {
                item.asset.clone()
            } else {
                self.gateway
                    .find_market_quote_asset(
                        &item.exchange_id,
                        &item.asset,
                        &self.preferred_quote_asset,
                    )
                    .await?
            };
            let value = self
                .gateway
                .get_btc_value(&item.exchange_id, &item.asset, &quote, item.quantity, time, None)
                .await?;
            total = total + value;
        }

        Ok(total)
    }

    /// Recompute weight and score for the trader's trades from `start_time`
    /// onward, oldest first. Returns the number of trades rewritten.
    ///
    /// Used after a history replay: trades recorded with scoring disabled
    /// get real values once the portfolio and entry history is complete. The
    /// baseline statistics roll forward with each rescored trade, the same
    /// window a live ingest would have seen.
    pub async fn rescore_trades(
        &self,
        uow: &mut UnitOfWork,
        trader_id: &TraderId,
        start_time: TimeMs,
    ) -> Result<usize, CoreError> {
        // seed the rolling window with trades fully exited before the first
        // rescored one
        let mut window = trades::recent(
            uow.conn(),
            trader_id,
            TimeMs::new(start_time.as_i64().saturating_sub(1)),
            self.num_recent_trades,
        )
        .await?;
        window.reverse();

        let mut rescored = 0usize;
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = trades::page_asc(
                uow.conn(),
                trader_id,
                start_time,
                TimeMs::new(i64::MAX),
                cursor.as_ref(),
                self.rescore_fetch_limit,
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
            for (row_id, mut trade) in page {
                let weight = self
                    .trade_weight(
                        uow,
                        trader_id,
                        &trade.exchange_id,
                        &trade.asset,
                        &trade.quote_asset,
                        trade.quantity,
                        trade.exit.time,
                        trade.exit.price,
                    )
                    .await?;

                let change =
                    scorer::trade_change(trade.entry.price, trade.exit.price).ok_or_else(|| {
                        CoreError::UnexpectedState(format!(
                            "zero entry price for {}/{} at {}",
                            trade.asset,
                            trade.quote_asset,
                            trade.entry.time.as_i64()
                        ))
                    })?;

                let daily = scorer::daily_scores(&window);
                let score = scorer::score(&scorer::ScoreInputs {
                    trade_change: change,
                    entry_time: trade.entry.time,
                    exit_time: trade.exit.time,
                    weight,
                    daily_mean: scorer::mean(&daily),
                    daily_std_dev: scorer::std_dev(&daily),
                });

                trades::update_scoring(uow.conn(), row_id, weight, score).await?;

                trade.weight = weight;
                trade.score = score;
                if window.len() as i64 >= self.num_recent_trades {
                    window.remove(0);
                }
                window.push(trade);
                rescored += 1;
            }

            if page_len < self.rescore_fetch_limit {
                break;
            }
        }

        debug!(trader_id = %trader_id, rescored, "trades rescored");
        Ok(rescored)
    }

    async fn mark_source_used(
        &self,
        uow: &mut UnitOfWork,
        trade: &Trade,
    ) -> Result<(), CoreError> {
        match trade.entry.source_type {
            SourceType::Order => {
                orders::use_quantity(
                    uow.conn(),
                    &trade.trader_id,
                    &trade.exchange_id,
                    &trade.entry.source_id,
                    trade.quantity,
                )
                .await
            }
            SourceType::Deposit => {
                transfers::use_deposit_quantity(
                    uow.conn(),
                    &trade.trader_id,
                    &trade.exchange_id,
                    &trade.entry.source_id,
                    trade.quantity,
                )
                .await
            }
            SourceType::Withdrawal => Err(CoreError::UnexpectedState(
                "a withdrawal cannot be a trade entry".to_string(),
            )),
        }
    }
}

fn validate(req: &NewTradeRequest) -> Result<(), CoreError> {
    if req.trader_id.as_str().is_empty() {
        return Err(CoreError::Validation("trader id is required".to_string()));
    }
    if req.exchange_id.as_str().is_empty() {
        return Err(CoreError::Validation("exchange id is required".to_string()));
    }
    if req.source_id.is_empty() {
        return Err(CoreError::Validation("source id is required".to_string()));
    }
    if !matches!(req.source_type, SourceType::Order | SourceType::Withdrawal) {
        return Err(CoreError::Validation(format!(
            "outflow source type must be order or withdrawal, got {}",
            req.source_type
        )));
    }
    if req.asset.as_str().is_empty() {
        return Err(CoreError::Validation("asset is required".to_string()));
    }
    if !req.exit_quantity.is_positive() {
        return Err(CoreError::Validation(format!(
            "exit quantity must be positive, got {}",
            req.exit_quantity
        )));
    }
    if req.exit_time.as_i64() <= 0 {
        return Err(CoreError::Validation(format!(
            "exit time must be positive, got {}",
            req.exit_time.as_i64()
        )));
    }
    Ok(())
}
