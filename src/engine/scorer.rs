//! Trade scoring: pure computation, no side effects.
//!
//! Returns consistent with a trader's own recent baseline count linearly;
//! returns exceeding it are compressed logarithmically, then everything is
//! scaled by the trade's share of total portfolio value.

use crate::domain::{Decimal, TimeMs, Trade};

pub const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Inputs to [`score`].
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    /// Fractional price change of the trade: `exitPrice / entryPrice - 1`.
    pub trade_change: Decimal,
    pub entry_time: TimeMs,
    pub exit_time: TimeMs,
    /// Share of total portfolio value at exit, in [0, 1].
    pub weight: Decimal,
    /// Mean of the trader's recent per-day trade scores.
    pub daily_mean: Decimal,
    /// Population standard deviation of the same set.
    pub daily_std_dev: Decimal,
}

/// Per-day score of each trade in the recent set.
///
/// Trades with non-positive duration carry no rate information and are
/// skipped rather than dividing by zero.
pub fn daily_scores(trades: &[Trade]) -> Vec<Decimal> {
    let day = Decimal::from_i64(ONE_DAY_MS);
    trades
        .iter()
        .filter(|t| t.duration_ms() > 0)
        .map(|t| {
            let days = Decimal::from_i64(t.duration_ms()) / day;
            t.score / days
        })
        .collect()
}

/// Arithmetic mean; zero for an empty set.
pub fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::zero();
    }
    let sum = values.iter().fold(Decimal::zero(), |acc, v| acc + *v);
    sum / Decimal::from_i64(values.len() as i64)
}

/// Population standard deviation; zero for an empty set.
pub fn std_dev(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::zero();
    }
    let avg = mean(values);
    let square_diffs: Vec<Decimal> = values
        .iter()
        .map(|v| {
            let diff = *v - avg;
            diff * diff
        })
        .collect();
    mean(&square_diffs).sqrt().unwrap_or_else(Decimal::zero)
}

/// Fractional price change between entry and exit.
pub fn trade_change(entry_price: Decimal, exit_price: Decimal) -> Option<Decimal> {
    if entry_price.is_zero() {
        return None;
    }
    Some(exit_price / entry_price - Decimal::one())
}

/// Trade's share of total portfolio value. Zero when the portfolio has no
/// measurable value, so an unvalued portfolio never produces a score.
pub fn weight(trade_btc_value: Decimal, portfolio_btc_value: Decimal) -> Decimal {
    match trade_btc_value.ratio_to(portfolio_btc_value) {
        Some(w) => w,
        None => Decimal::zero(),
    }
}

/// Statistically-normalized trade score.
///
/// The change within `(mean + stddev) * durationDays` of the trader's own
/// baseline passes through linearly; the excess is dampened with
/// `log2(excess * 100) / 100`, clamped at zero. The sum is weighted by
/// portfolio share and scaled to percent.
pub fn score(inputs: &ScoreInputs) -> Decimal {
    let duration_days = Decimal::from_i64(inputs.exit_time.as_i64() - inputs.entry_time.as_i64())
        / Decimal::from_i64(ONE_DAY_MS);

    let baseline = inputs.daily_mean.max(Decimal::zero()) + inputs.daily_std_dev.max(Decimal::zero());
    let threshold = baseline * duration_days;

    let outbound = (inputs.trade_change - threshold).max(Decimal::zero());
    let inbound = inputs.trade_change - outbound;

    let dampened_outbound = (outbound * Decimal::hundred())
        .log2()
        .map(|l| l / Decimal::hundred())
        .unwrap_or_else(Decimal::zero)
        .max(Decimal::zero());

    (inbound + dampened_outbound) * inputs.weight * Decimal::hundred()
}
