//! Domain types for the trader scoring engine.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: TimeMs, TraderId, ExchangeId, Asset, Side, Period
//! - Order, Deposit/Withdrawal, Trade and ScoreEntry types
//! - Domain events published after transaction commit

pub mod decimal;
pub mod events;
pub mod order;
pub mod primitives;
pub mod score;
pub mod trade;
pub mod transfer;

pub use decimal::Decimal;
pub use events::DomainEvent;
pub use order::{Order, OrderFee};
pub use primitives::{Asset, ExchangeId, Period, Side, SourceType, TimeMs, TraderId, GLOBAL_PERIOD};
pub use score::{ScheduleEntry, ScoreEntry};
pub use trade::{Trade, TradeEntry, TradeExit};
pub use transfer::{Deposit, Withdrawal};
