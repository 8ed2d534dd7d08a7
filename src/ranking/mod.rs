//! Ranking cache: one in-process leaderboard per period.
//!
//! Non-transactional. Writers inside a unit of work must register a
//! compensation restoring the previous value, so an aborted transaction
//! leaves the cache exactly as it found it.

use crate::domain::{Decimal, Period, TraderId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedTrader {
    pub trader_id: TraderId,
    pub score: Decimal,
    pub rank: u64,
}

/// Period-keyed map of current trader scores with ranked reads.
#[derive(Default)]
pub struct RankingCache {
    boards: RwLock<HashMap<Period, HashMap<TraderId, Decimal>>>,
}

impl RankingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached score for a trader in a period.
    pub fn get(&self, period: &Period, trader_id: &TraderId) -> Option<Decimal> {
        self.boards
            .read()
            .get(period)
            .and_then(|board| board.get(trader_id))
            .copied()
    }

    /// Set the trader's current score for a period.
    pub fn upsert(&self, period: &Period, trader_id: &TraderId, score: Decimal) {
        self.boards
            .write()
            .entry(period.clone())
            .or_default()
            .insert(trader_id.clone(), score);
    }

    /// Put the trader's entry back to a previously observed state.
    /// `None` means the trader had no entry.
    pub fn restore(&self, period: &Period, trader_id: &TraderId, previous: Option<Decimal>) {
        let mut boards = self.boards.write();
        let board = boards.entry(period.clone()).or_default();
        match previous {
            Some(score) => {
                board.insert(trader_id.clone(), score);
            }
            None => {
                board.remove(trader_id);
            }
        }
    }

    /// Top `limit` traders for a period, best first. Ties break by trader id
    /// so the ordering is deterministic.
    pub fn top(&self, period: &Period, limit: usize) -> Vec<RankedTrader> {
        let boards = self.boards.read();
        let Some(board) = boards.get(period) else {
            return Vec::new();
        };

        let mut ranked: Vec<(TraderId, Decimal)> = board
            .iter()
            .map(|(id, score)| (id.clone(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (trader_id, score))| RankedTrader {
                trader_id,
                score,
                rank: (i + 1) as u64,
            })
            .collect()
    }

    /// 1-based rank of a trader within a period, None when absent.
    pub fn rank_of(&self, period: &Period, trader_id: &TraderId) -> Option<u64> {
        let boards = self.boards.read();
        let board = boards.get(period)?;
        let own = board.get(trader_id)?;

        let ahead = board
            .iter()
            .filter(|(id, score)| {
                **score > *own || (**score == *own && id.as_str() < trader_id.as_str())
            })
            .count();
        Some((ahead + 1) as u64)
    }
}
