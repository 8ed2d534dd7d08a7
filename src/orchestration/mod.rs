//! Transaction-scoped orchestration of matching, scoring and ingestion.
//!
//! Every ingestion operation runs inside a [`UnitOfWork`]: a SQLite
//! transaction plus buffered domain events and rollback compensations for
//! the non-transactional ranking cache.

pub mod events;
pub mod ingress;
pub mod schedule;
pub mod scores;
pub mod trades;
pub mod uow;

pub use events::EventBus;
pub use ingress::{DepositEvent, FilledOrderEvent, IngressService, WithdrawalEvent};
pub use scores::ScoreService;
pub use trades::{NewTradeRequest, TradeService};
pub use uow::UnitOfWork;
