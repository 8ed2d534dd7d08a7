//! In-memory exchange gateway for tests and local runs.

use crate::domain::{Asset, Decimal, Deposit, ExchangeId, Order, TimeMs, TraderId, Withdrawal};
use crate::error::CoreError;
use crate::exchange::ExchangeGateway;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

const BTC: &str = "BTC";

/// Exchange gateway backed by seeded in-memory tables.
///
/// Prices are keyed by (exchange, asset, quote) and constant over time.
#[derive(Default)]
pub struct MockExchange {
    prices: RwLock<HashMap<(String, String, String), Decimal>>,
    root_assets: RwLock<HashSet<(String, String)>>,
    markets: RwLock<HashMap<(String, String), Vec<Asset>>>,
    orders: RwLock<HashMap<(String, String), Vec<Order>>>,
    deposits: RwLock<HashMap<(String, String), Vec<Deposit>>>,
    withdrawals: RwLock<HashMap<(String, String), Vec<Withdrawal>>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, exchange_id: &ExchangeId, asset: &Asset, quote: &Asset, price: Decimal) {
        self.prices.write().insert(
            (
                exchange_id.as_str().to_string(),
                asset.as_str().to_string(),
                quote.as_str().to_string(),
            ),
            price,
        );
    }

    pub fn add_root_asset(&self, exchange_id: &ExchangeId, asset: &Asset) {
        self.root_assets.write().insert((
            exchange_id.as_str().to_string(),
            asset.as_str().to_string(),
        ));
    }

    pub fn add_market(&self, exchange_id: &ExchangeId, asset: &Asset, quote: &Asset) {
        self.markets
            .write()
            .entry((
                exchange_id.as_str().to_string(),
                asset.as_str().to_string(),
            ))
            .or_default()
            .push(quote.clone());
    }

    pub fn add_order_history(&self, order: Order) {
        let key = (
            order.trader_id.as_str().to_string(),
            order.exchange_id.as_str().to_string(),
        );
        let mut orders = self.orders.write();
        let list = orders.entry(key).or_default();
        list.push(order);
        list.sort_by_key(|o| o.time);
    }

    pub fn add_deposit_history(&self, deposit: Deposit) {
        let key = (
            deposit.trader_id.as_str().to_string(),
            deposit.exchange_id.as_str().to_string(),
        );
        let mut deposits = self.deposits.write();
        let list = deposits.entry(key).or_default();
        list.push(deposit);
        list.sort_by_key(|d| d.time);
    }

    pub fn add_withdrawal_history(&self, withdrawal: Withdrawal) {
        let key = (
            withdrawal.trader_id.as_str().to_string(),
            withdrawal.exchange_id.as_str().to_string(),
        );
        let mut withdrawals = self.withdrawals.write();
        let list = withdrawals.entry(key).or_default();
        list.push(withdrawal);
        list.sort_by_key(|w| w.time);
    }

    fn lookup_price(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote: &Asset,
    ) -> Result<Decimal, CoreError> {
        if asset == quote {
            return Ok(Decimal::one());
        }
        self.prices
            .read()
            .get(&(
                exchange_id.as_str().to_string(),
                asset.as_str().to_string(),
                quote.as_str().to_string(),
            ))
            .copied()
            .ok_or_else(|| {
                CoreError::Gateway(format!(
                    "no price for {}/{} on {}",
                    asset, quote, exchange_id
                ))
            })
    }

    fn history_page<T: Clone>(
        map: &HashMap<(String, String), Vec<T>>,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
        time_of: impl Fn(&T) -> TimeMs,
    ) -> Vec<T> {
        map.get(&(
            trader_id.as_str().to_string(),
            exchange_id.as_str().to_string(),
        ))
        .map(|items| {
            items
                .iter()
                .filter(|item| time_of(item) >= start_time)
                .take(limit as usize)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn get_filled_orders(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Order>, CoreError> {
        Ok(Self::history_page(
            &self.orders.read(),
            trader_id,
            exchange_id,
            start_time,
            limit,
            |o| o.time,
        ))
    }

    async fn get_successful_deposits(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Deposit>, CoreError> {
        Ok(Self::history_page(
            &self.deposits.read(),
            trader_id,
            exchange_id,
            start_time,
            limit,
            |d| d.time,
        ))
    }

    async fn get_successful_withdrawals(
        &self,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        start_time: TimeMs,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, CoreError> {
        Ok(Self::history_page(
            &self.withdrawals.read(),
            trader_id,
            exchange_id,
            start_time,
            limit,
            |w| w.time,
        ))
    }

    async fn get_price(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote_asset: &Asset,
        _time: TimeMs,
    ) -> Result<Decimal, CoreError> {
        self.lookup_price(exchange_id, asset, quote_asset)
    }

    async fn get_btc_value(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        quote_asset: &Asset,
        qty: Decimal,
        _time: TimeMs,
        price: Option<Decimal>,
    ) -> Result<Decimal, CoreError> {
        if asset.as_str() == BTC {
            return Ok(qty);
        }

        let asset_price = match price {
            Some(p) => p,
            None => self.lookup_price(exchange_id, asset, quote_asset)?,
        };
        let quote_value = qty * asset_price;

        if quote_asset.as_str() == BTC {
            return Ok(quote_value);
        }
        let quote_btc = self.lookup_price(exchange_id, quote_asset, &Asset::new(BTC))?;
        Ok(quote_value * quote_btc)
    }

    async fn is_root_asset(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
    ) -> Result<bool, CoreError> {
        Ok(self.root_assets.read().contains(&(
            exchange_id.as_str().to_string(),
            asset.as_str().to_string(),
        )))
    }

    async fn find_market_quote_asset(
        &self,
        exchange_id: &ExchangeId,
        asset: &Asset,
        preferred_quote_asset: &Asset,
    ) -> Result<Asset, CoreError> {
        let markets = self.markets.read();
        let quotes = markets
            .get(&(
                exchange_id.as_str().to_string(),
                asset.as_str().to_string(),
            ))
            .ok_or_else(|| {
                CoreError::Gateway(format!("no markets for {} on {}", asset, exchange_id))
            })?;

        if quotes.contains(preferred_quote_asset) {
            return Ok(preferred_quote_asset.clone());
        }
        quotes.first().cloned().ok_or_else(|| {
            CoreError::Gateway(format!("no markets for {} on {}", asset, exchange_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_btc_value_through_non_btc_quote() {
        let exchange = MockExchange::new();
        let binance = ExchangeId::new("binance");
        let eth = Asset::new("ETH");
        let usdt = Asset::new("USDT");
        exchange.set_price(&binance, &eth, &usdt, dec("2000"));
        exchange.set_price(&binance, &usdt, &Asset::new("BTC"), dec("0.00002"));

        let value = exchange
            .get_btc_value(&binance, &eth, &usdt, dec("3"), TimeMs::new(0), None)
            .await
            .unwrap();

        // 3 * 2000 * 0.00002 = 0.12
        assert_eq!(value, dec("0.12"));
    }

    #[tokio::test]
    async fn test_find_market_quote_prefers_preferred() {
        let exchange = MockExchange::new();
        let binance = ExchangeId::new("binance");
        let xyz = Asset::new("XYZ");
        exchange.add_market(&binance, &xyz, &Asset::new("USDT"));
        exchange.add_market(&binance, &xyz, &Asset::new("BTC"));

        let quote = exchange
            .find_market_quote_asset(&binance, &xyz, &Asset::new("BTC"))
            .await
            .unwrap();
        assert_eq!(quote, Asset::new("BTC"));

        let missing = exchange
            .find_market_quote_asset(&binance, &Asset::new("ABC"), &Asset::new("BTC"))
            .await;
        assert!(missing.is_err());
    }
}
