//! Deposit and withdrawal transfer types.

use crate::domain::{Asset, Decimal, ExchangeId, TimeMs, TraderId};
use serde::{Deserialize, Serialize};

/// A successful deposit: an inflow of asset quantity available for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub asset: Asset,
    pub quantity: Decimal,
    /// Remaining quantity not yet consumed by trades. Only ever decreases.
    pub quantity_unused: Decimal,
    pub time: TimeMs,
}

impl Deposit {
    pub fn new(
        trader_id: TraderId,
        exchange_id: ExchangeId,
        source_id: impl Into<String>,
        asset: Asset,
        quantity: Decimal,
        time: TimeMs,
    ) -> Self {
        Deposit {
            trader_id,
            exchange_id,
            source_id: source_id.into(),
            asset,
            quantity,
            quantity_unused: quantity,
            time,
        }
    }
}

/// A successful withdrawal: an outflow that triggers entry matching. Never
/// tracked as unused inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub source_id: String,
    pub asset: Asset,
    pub quantity: Decimal,
    pub time: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_deposit_starts_fully_unused() {
        let d = Deposit::new(
            TraderId::new("t1"),
            ExchangeId::new("binance"),
            "d1",
            Asset::new("BTC"),
            Decimal::from_str("2.5").unwrap(),
            TimeMs::new(1000),
        );
        assert_eq!(d.quantity_unused, d.quantity);
    }
}
