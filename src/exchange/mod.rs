//! Exchange gateway: market data and account history collaborators.

pub mod mock;

use crate::domain::{Asset, Decimal, Deposit, ExchangeId, Order, TimeMs, TraderId, Withdrawal};
use crate::error::CoreError;
use async_trait::async_trait;

pub use mock::MockExchange;

/// Market-data and account-history access for one or more exchanges.
///
/// History methods return events at or after `start_time` in ascending time
/// order, capped at `limit`; they exist to replay a trader's past activity
/// when an exchange account is first connected.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_filled_orders(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Order>, CoreError>;

    async fn get_successful_deposits(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Deposit>, CoreError>;

    async fn get_successful_withdrawals(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, CoreError>;

    /// Price of `asset` in `quote_asset` at `time`.
    async fn get_price(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote_asset: &Asset,
        time: TimeMs,
    ) -> Result<Decimal, CoreError>;

    /// Value of `qty` of `asset` in BTC at `time`. When the caller already
    /// holds the asset's price in `quote_asset` it passes it to avoid a
    /// second lookup.
    async fn get_btc_value(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote_asset: &Asset,
        qty: Decimal,
        time: TimeMs,
        price: Option<Decimal>,
    ) -> Result<Decimal, CoreError>;

    /// Whether `asset` is a root (stable-pricing) asset on the exchange.
    async fn is_root_asset(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
    ) -> Result<bool, CoreError>;

    /// The quote asset of a market for `asset`, preferring
    /// `preferred_quote_asset` when such a market exists.
    async fn find_market_quote_asset(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        preferred_quote_asset: &Asset,
    ) -> Result<Asset, CoreError>;
}
