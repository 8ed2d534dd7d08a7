//! Score ledger and schedule entry types.

use crate::domain::{Decimal, Period, TimeMs, TraderId};
use serde::{Deserialize, Serialize};

/// One point in a trader's compounding score series for a period.
///
/// For a fixed (trader, period), entries sorted by time form a compounding
/// chain: each score equals its predecessor times `(1 + delta/100)` for the
/// delta applied at that time. Retroactive inserts preserve each successor's
/// multiplicative ratio to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub trader_id: TraderId,
    pub period: Period,
    pub score: Decimal,
    pub time: TimeMs,
}

/// A pending periodic re-score trigger: re-run the full recompute for
/// (trader, period) once `due_time` passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub trader_id: TraderId,
    pub period: Period,
    pub due_time: TimeMs,
}
