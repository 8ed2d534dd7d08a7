pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod locks;
pub mod orchestration;
pub mod ranking;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Asset, Decimal, Deposit, DomainEvent, ExchangeId, Order, OrderFee, Period, ScoreEntry, Side,
    SourceType, TimeMs, Trade, TraderId, Withdrawal,
};
pub use error::{AppError, CoreError};
pub use exchange::{ExchangeGateway, MockExchange};
pub use locks::ScoreLocks;
pub use orchestration::{EventBus, IngressService, ScoreService, TradeService, UnitOfWork};
pub use ranking::RankingCache;
