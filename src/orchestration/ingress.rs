//! Ingestion operations: one transaction per delivered exchange event.
//!
//! Delivery is at-least-once; unique-constraint inserts absorb duplicates,
//! so a redelivered event commits without side effects.

use crate::db::repo::{orders, portfolio, trades, transfers};
use crate::domain::{
    Asset, Decimal, Deposit, ExchangeId, Order, OrderFee, Side, SourceType, TimeMs, Trade,
    TraderId, Withdrawal,
};
use crate::error::CoreError;
use crate::exchange::ExchangeGateway;
use crate::orchestration::events::EventBus;
use crate::orchestration::scores::ScoreService;
use crate::orchestration::trades::{NewTradeRequest, TradeService};
use crate::orchestration::uow::UnitOfWork;
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A filled order delivered by the inbound transport.
#[derive(Debug, Clone, Deserialize)]
pub struct FilledOrderEvent {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub side: Side,
    pub asset: Asset,
    pub quote_asset: Asset,
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub fee: Option<OrderFee>,
    pub time: TimeMs,
    /// Historical replay: record the event without scoring it.
    #[serde(default)]
    pub past: bool,
}

/// A successful deposit delivered by the inbound transport.
#[derive(Debug, Clone, Deserialize)]
pub struct DepositEvent {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub asset: Asset,
    pub quantity: Decimal,
    pub time: TimeMs,
}

/// A successful withdrawal delivered by the inbound transport.
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalEvent {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub asset: Asset,
    pub quantity: Decimal,
    pub time: TimeMs,
    #[serde(default)]
    pub past: bool,
}

/// Entry point for everything the inbound transport delivers.
pub struct IngressService {
    pool: SqlitePool,
    gateway: Arc<dyn ExchangeGateway>,
    trades: Arc<TradeService>,
    scores: Arc<ScoreService>,
    bus: EventBus,
    resync_fetch_limit: i64,
}

impl IngressService {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn ExchangeGateway>,
        trades: Arc<TradeService>,
        scores: Arc<ScoreService>,
        bus: EventBus,
        resync_fetch_limit: i64,
    ) -> Self {
        IngressService {
            pool,
            gateway,
            trades,
            scores,
            bus,
            resync_fetch_limit,
        }
    }

    /// Ingest a filled order: record it, move both portfolio legs, and match
    /// its outflow leg into trades.
    pub async fn filled_order(&self, event: FilledOrderEvent) -> Result<Vec<Trade>, CoreError> {
        validate_filled_order(&event)?;

        let order = Order {
            trader_id: event.trader_id.clone(),
            exchange_id: event.exchange_id.clone(),
            source_id: event.source_id.clone(),
            side: event.side,
            asset: event.asset.clone(),
            quote_asset: event.quote_asset.clone(),
            price: event.price,
            quantity: event.quantity,
            quantity_unused: event.quantity,
            fee: event.fee.clone(),
            time: event.time,
        };

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        match self.apply_filled_order(&mut uow, &order, event.past).await {
            Ok(trades) => {
                uow.commit(&self.bus).await?;
                Ok(trades)
            }
            Err(e) => {
                rollback_logged(uow).await;
                Err(e)
            }
        }
    }

    async fn apply_filled_order(
        &self,
        uow: &mut UnitOfWork,
        order: &Order,
        past: bool,
    ) -> Result<Vec<Trade>, CoreError> {
        let inserted = orders::insert(uow.conn(), order).await?;
        if !inserted {
            debug!(
                trader_id = %order.trader_id,
                source_id = %order.source_id,
                "duplicate order event absorbed"
            );
            return Ok(Vec::new());
        }

        let quote_quantity = order.quantity * order.price;
        match order.side {
            Side::Buy => {
                portfolio::increment(
                    uow.conn(),
                    &order.trader_id,
                    &order.exchange_id,
                    &order.asset,
                    order.quantity,
                    order.time,
                )
                .await?;
                portfolio::decrement(
                    uow.conn(),
                    &order.trader_id,
                    &order.exchange_id,
                    &order.quote_asset,
                    quote_quantity,
                    order.time,
                )
                .await?;
            }
            Side::Sell => {
                portfolio::decrement(
                    uow.conn(),
                    &order.trader_id,
                    &order.exchange_id,
                    &order.asset,
                    order.quantity,
                    order.time,
                )
                .await?;
                portfolio::increment(
                    uow.conn(),
                    &order.trader_id,
                    &order.exchange_id,
                    &order.quote_asset,
                    quote_quantity,
                    order.time,
                )
                .await?;
            }
        }

        if let Some(fee) = &order.fee {
            if fee.quantity.is_positive() {
                portfolio::decrement(
                    uow.conn(),
                    &order.trader_id,
                    &order.exchange_id,
                    &fee.asset,
                    fee.quantity,
                    order.time,
                )
                .await?;
            }
        }

        let (exit_asset, exit_quantity) = order.outflow();
        self.trades
            .new_trade(
                uow,
                &NewTradeRequest {
                    trader_id: order.trader_id.clone(),
                    exchange_id: order.exchange_id.clone(),
                    source_id: order.source_id.clone(),
                    source_type: SourceType::Order,
                    asset: exit_asset,
                    exit_quantity,
                    exit_time: order.time,
                    disable_scoring: past,
                    increment_scores: !past,
                },
            )
            .await
    }

    /// Ingest a deposit: record it and credit the portfolio.
    pub async fn deposit(&self, event: DepositEvent) -> Result<(), CoreError> {
        validate_transfer(
            &event.trader_id,
            &event.exchange_id,
            &event.source_id,
            &event.asset,
            event.quantity,
            event.time,
        )?;

        let deposit = Deposit::new(
            event.trader_id.clone(),
            event.exchange_id.clone(),
            event.source_id.clone(),
            event.asset.clone(),
            event.quantity,
            event.time,
        );

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let result = async {
            let inserted = transfers::insert_deposit(uow.conn(), &deposit).await?;
            if !inserted {
                debug!(
                    trader_id = %deposit.trader_id,
                    source_id = %deposit.source_id,
                    "duplicate deposit event absorbed"
                );
                return Ok(());
            }
            portfolio::increment(
                uow.conn(),
                &deposit.trader_id,
                &deposit.exchange_id,
                &deposit.asset,
                deposit.quantity,
                deposit.time,
            )
            .await
        }
        .await;

        match result {
            Ok(()) => uow.commit(&self.bus).await,
            Err(e) => {
                rollback_logged(uow).await;
                Err(e)
            }
        }
    }

    /// Ingest a withdrawal: record it, debit the portfolio, and match the
    /// outflow into trades.
    pub async fn withdrawal(&self, event: WithdrawalEvent) -> Result<Vec<Trade>, CoreError> {
        validate_transfer(
            &event.trader_id,
            &event.exchange_id,
            &event.source_id,
            &event.asset,
            event.quantity,
            event.time,
        )?;

        let withdrawal = Withdrawal {
            trader_id: event.trader_id.clone(),
            exchange_id: event.exchange_id.clone(),
            source_id: event.source_id.clone(),
            asset: event.asset.clone(),
            quantity: event.quantity,
            time: event.time,
        };

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        match self.apply_withdrawal(&mut uow, &withdrawal, event.past).await {
            Ok(trades) => {
                uow.commit(&self.bus).await?;
                Ok(trades)
            }
            Err(e) => {
                rollback_logged(uow).await;
                Err(e)
            }
        }
    }

    async fn apply_withdrawal(
        &self,
        uow: &mut UnitOfWork,
        withdrawal: &Withdrawal,
        past: bool,
    ) -> Result<Vec<Trade>, CoreError> {
        let inserted = transfers::insert_withdrawal(uow.conn(), withdrawal).await?;
        if !inserted {
            debug!(
                trader_id = %withdrawal.trader_id,
                source_id = %withdrawal.source_id,
                "duplicate withdrawal event absorbed"
            );
            return Ok(Vec::new());
        }

        portfolio::decrement(
            uow.conn(),
            &withdrawal.trader_id,
            &withdrawal.exchange_id,
            &withdrawal.asset,
            withdrawal.quantity,
            withdrawal.time,
        )
        .await?;

        self.trades
            .new_trade(
                uow,
                &NewTradeRequest {
                    trader_id: withdrawal.trader_id.clone(),
                    exchange_id: withdrawal.exchange_id.clone(),
                    source_id: withdrawal.source_id.clone(),
                    source_type: SourceType::Withdrawal,
                    asset: withdrawal.asset.clone(),
                    exit_quantity: withdrawal.quantity,
                    exit_time: withdrawal.time,
                    disable_scoring: past,
                    increment_scores: !past,
                },
            )
            .await
    }

    /// Replay a newly connected exchange account's full history, oldest
    /// first, with scoring disabled, then rebuild the score chains once.
    ///
    /// Each replayed event runs in its own transaction, so a partial resync
    /// can be resumed by running it again; duplicates are absorbed.
    pub async fn trader_exchange(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
    ) -> Result<(), CoreError> {
        info!(trader_id = %trader_id, exchange_id = %exchange_id, "exchange resync started");

        let mut orders_stream = ResyncStream::new();
        let mut deposits_stream = ResyncStream::new();
        let mut withdrawals_stream = ResyncStream::new();
        let mut replayed = 0usize;

        loop {
            if orders_stream.needs_refill() {
                let page = self
                    .gateway
                    .get_filled_orders(
                        trader_id,
                        exchange_id,
                        orders_stream.next_start(),
                        self.resync_fetch_limit,
                    )
                    .await?;
                orders_stream.accept(page.len(), self.resync_fetch_limit, page.last().map(|o| o.time));
                orders_stream.buf.extend(page.into_iter().map(ResyncItem::Order));
            }
            if deposits_stream.needs_refill() {
                let page = self
                    .gateway
                    .get_successful_deposits(
                        trader_id,
                        exchange_id,
                        deposits_stream.next_start(),
                        self.resync_fetch_limit,
                    )
                    .await?;
                deposits_stream.accept(page.len(), self.resync_fetch_limit, page.last().map(|d| d.time));
                deposits_stream.buf.extend(page.into_iter().map(ResyncItem::Deposit));
            }
            if withdrawals_stream.needs_refill() {
                let page = self
                    .gateway
                    .get_successful_withdrawals(
                        trader_id,
                        exchange_id,
                        withdrawals_stream.next_start(),
                        self.resync_fetch_limit,
                    )
                    .await?;
                withdrawals_stream
                    .accept(page.len(), self.resync_fetch_limit, page.last().map(|w| w.time));
                withdrawals_stream.buf.extend(page.into_iter().map(ResyncItem::Withdrawal));
            }

            let Some(item) = pop_oldest(&mut [
                &mut orders_stream,
                &mut deposits_stream,
                &mut withdrawals_stream,
            ]) else {
                break;
            };

            self.replay(item).await?;
            replayed += 1;
        }

        // scoring was disabled during the replay; rescore the trades now
        // that the full history is in place, then build the chains once
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let repair = async {
            if let Some(first_exit) = trades::first_exit_time(uow.conn(), trader_id).await? {
                self.trades
                    .rescore_trades(&mut uow, trader_id, first_exit)
                    .await?;
            }
            self.scores
                .calculate_scores(&mut uow, trader_id, TimeMs::now())
                .await
        }
        .await;
        match repair {
            Ok(()) => uow.commit(&self.bus).await?,
            Err(e) => {
                rollback_logged(uow).await;
                return Err(e);
            }
        }

        info!(
            trader_id = %trader_id,
            exchange_id = %exchange_id,
            replayed,
            "exchange resync complete"
        );
        Ok(())
    }

    async fn replay(&self, item: ResyncItem) -> Result<(), CoreError> {
        match item {
            ResyncItem::Order(order) => {
                self.filled_order(FilledOrderEvent {
                    trader_id: order.trader_id,
                    exchange_id: order.exchange_id,
                    source_id: order.source_id,
                    side: order.side,
                    asset: order.asset,
                    quote_asset: order.quote_asset,
                    price: order.price,
                    quantity: order.quantity,
                    fee: order.fee,
                    time: order.time,
                    past: true,
                })
                .await?;
            }
            ResyncItem::Deposit(deposit) => {
                self.deposit(DepositEvent {
                    trader_id: deposit.trader_id,
                    exchange_id: deposit.exchange_id,
                    source_id: deposit.source_id,
                    asset: deposit.asset,
                    quantity: deposit.quantity,
                    time: deposit.time,
                })
                .await?;
            }
            ResyncItem::Withdrawal(withdrawal) => {
                self.withdrawal(WithdrawalEvent {
                    trader_id: withdrawal.trader_id,
                    exchange_id: withdrawal.exchange_id,
                    source_id: withdrawal.source_id,
                    asset: withdrawal.asset,
                    quantity: withdrawal.quantity,
                    time: withdrawal.time,
                    past: true,
                })
                .await?;
            }
        }
        Ok(())
    }
}

enum ResyncItem {
    Order(Order),
    Deposit(Deposit),
    Withdrawal(Withdrawal),
}

impl ResyncItem {
    fn time(&self) -> TimeMs {
        match self {
            ResyncItem::Order(o) => o.time,
            ResyncItem::Deposit(d) => d.time,
            ResyncItem::Withdrawal(w) => w.time,
        }
    }
}

/// One ascending history stream during a resync.
struct ResyncStream {
    buf: std::collections::VecDeque<ResyncItem>,
    last_time: Option<TimeMs>,
    exhausted: bool,
}

impl ResyncStream {
    fn new() -> Self {
        ResyncStream {
            buf: std::collections::VecDeque::new(),
            last_time: None,
            exhausted: false,
        }
    }

    fn needs_refill(&self) -> bool {
        self.buf.is_empty() && !self.exhausted
    }

    fn next_start(&self) -> TimeMs {
        match self.last_time {
            None => TimeMs::new(0),
            Some(t) => TimeMs::new(t.as_i64() + 1),
        }
    }

    fn accept(&mut self, page_len: usize, limit: i64, last_time: Option<TimeMs>) {
        if (page_len as i64) < limit {
            self.exhausted = true;
        }
        if let Some(t) = last_time {
            self.last_time = Some(t);
        }
    }
}

/// Pop the globally oldest buffered item across the streams.
fn pop_oldest(streams: &mut [&mut ResyncStream]) -> Option<ResyncItem> {
    let mut best: Option<(usize, TimeMs)> = None;
    for (i, stream) in streams.iter().enumerate() {
        if let Some(item) = stream.buf.front() {
            let t = item.time();
            if best.map_or(true, |(_, bt)| t < bt) {
                best = Some((i, t));
            }
        }
    }
    best.and_then(|(i, _)| streams[i].buf.pop_front())
}

async fn rollback_logged(uow: UnitOfWork) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}

fn validate_asset(label: &str, asset: &Asset) -> Result<(), CoreError> {
    let len = asset.as_str().len();
    if !(2..=8).contains(&len) {
        return Err(CoreError::Validation(format!(
            "{} must be 2-8 characters, got {:?}",
            label,
            asset.as_str()
        )));
    }
    Ok(())
}

fn validate_filled_order(event: &FilledOrderEvent) -> Result<(), CoreError> {
    if event.trader_id.as_str().is_empty() {
        return Err(CoreError::Validation("trader id is required".to_string()));
    }
    if event.exchange_id.as_str().is_empty() {
        return Err(CoreError::Validation("exchange id is required".to_string()));
    }
    if event.source_id.is_empty() {
        return Err(CoreError::Validation("source id is required".to_string()));
    }
    validate_asset("asset", &event.asset)?;
    validate_asset("quote asset", &event.quote_asset)?;
    if !event.price.is_positive() {
        return Err(CoreError::Validation(format!(
            "price must be positive, got {}",
            event.price
        )));
    }
    if !event.quantity.is_positive() {
        return Err(CoreError::Validation(format!(
            "quantity must be positive, got {}",
            event.quantity
        )));
    }
    if event.time.as_i64() <= 0 {
        return Err(CoreError::Validation(format!(
            "time must be positive, got {}",
            event.time.as_i64()
        )));
    }
    if let Some(fee) = &event.fee {
        if fee.quantity.is_negative() {
            return Err(CoreError::Validation(format!(
                "fee quantity must not be negative, got {}",
                fee.quantity
            )));
        }
    }
    Ok(())
}

fn validate_transfer(
    trader_id: &TraderId,
    exchange_id: &ExchangeId,
    source_id: &str,
    asset: &Asset,
    quantity: Decimal,
    time: TimeMs,
) -> Result<(), CoreError> {
    if trader_id.as_str().is_empty() {
        return Err(CoreError::Validation("trader id is required".to_string()));
    }
    if exchange_id.as_str().is_empty() {
        return Err(CoreError::Validation("exchange id is required".to_string()));
    }
    if source_id.is_empty() {
        return Err(CoreError::Validation("source id is required".to_string()));
    }
    validate_asset("asset", asset)?;
    if !quantity.is_positive() {
        return Err(CoreError::Validation(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if time.as_i64() <= 0 {
        return Err(CoreError::Validation(format!(
            "time must be positive, got {}",
            time.as_i64()
        )));
    }
    Ok(())
}
