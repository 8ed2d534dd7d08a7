//! Filled-order type: the inflow/outflow pair produced by one execution.

use crate::domain::{Asset, Decimal, ExchangeId, Side, TimeMs, TraderId};
use serde::{Deserialize, Serialize};

/// Fee charged on an order, in its own asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFee {
    pub asset: Asset,
    pub quantity: Decimal,
}

/// A filled order ingested from an exchange.
///
/// A buy order is an inflow of `asset` (tracked via `quantity_unused`) and an
/// outflow of `quote_asset`; a sell order is the reverse. Unique per
/// (trader, exchange, source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub side: Side,
    pub asset: Asset,
    pub quote_asset: Asset,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Remaining quantity not yet consumed by trades. Only ever decreases.
    pub quantity_unused: Decimal,
    pub fee: Option<OrderFee>,
    pub time: TimeMs,
}

impl Order {
    /// The asset and quantity disposed of by this order (its outflow leg).
    ///
    /// Buying spends `quantity * price` of the quote asset; selling spends
    /// `quantity` of the base asset.
    pub fn outflow(&self) -> (Asset, Decimal) {
        match self.side {
            Side::Buy => (self.quote_asset.clone(), self.quantity * self.price),
            Side::Sell => (self.asset.clone(), self.quantity),
        }
    }

    /// The asset acquired by this order (its inflow leg).
    pub fn inflow_asset(&self) -> &Asset {
        match self.side {
            Side::Buy => &self.asset,
            Side::Sell => &self.quote_asset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn order(side: Side) -> Order {
        Order {
            trader_id: TraderId::new("trader1"),
            exchange_id: ExchangeId::new("binance"),
            source_id: "o1".to_string(),
            side,
            asset: Asset::new("ETH"),
            quote_asset: Asset::new("BTC"),
            price: Decimal::from_str("0.05").unwrap(),
            quantity: Decimal::from_str("10").unwrap(),
            quantity_unused: Decimal::from_str("10").unwrap(),
            fee: None,
            time: TimeMs::new(1000),
        }
    }

    #[test]
    fn test_buy_outflow_is_quote_leg() {
        let (asset, qty) = order(Side::Buy).outflow();
        assert_eq!(asset, Asset::new("BTC"));
        assert_eq!(qty, Decimal::from_str("0.5").unwrap());
    }

    #[test]
    fn test_sell_outflow_is_base_leg() {
        let (asset, qty) = order(Side::Sell).outflow();
        assert_eq!(asset, Asset::new("ETH"));
        assert_eq!(qty, Decimal::from_str("10").unwrap());
    }

    #[test]
    fn test_inflow_asset() {
        assert_eq!(order(Side::Buy).inflow_asset(), &Asset::new("ETH"));
        assert_eq!(order(Side::Sell).inflow_asset(), &Asset::new("BTC"));
    }
}
