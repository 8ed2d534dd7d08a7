//! Trade type: one matched entry against one outflow, immutable after creation.

use crate::domain::{Asset, Decimal, ExchangeId, SourceType, TimeMs, TraderId};
use serde::{Deserialize, Serialize};

/// The entry side of a trade: the historical inflow that funded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEntry {
    pub source_id: String,
    pub source_type: SourceType,
    pub price: Decimal,
    pub time: TimeMs,
}

/// The exit side of a trade: the outflow event that closed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExit {
    pub source_id: String,
    pub source_type: SourceType,
    pub price: Decimal,
    pub time: TimeMs,
}

/// A scored trade. Created once per matched entry; never mutated or deleted.
///
/// The quantities of all trades produced from one outflow event sum exactly to
/// that outflow's quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trader_id: TraderId,
    pub exchange_id: ExchangeId,
    pub asset: Asset,
    pub quote_asset: Asset,
    pub quantity: Decimal,
    pub entry: TradeEntry,
    pub exit: TradeExit,
    /// Share of the trader's total portfolio value at exit time, in [0, 1].
    pub weight: Decimal,
    pub score: Decimal,
}

impl Trade {
    /// Trade duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.exit.time.as_i64() - self.entry.time.as_i64()
    }
}
