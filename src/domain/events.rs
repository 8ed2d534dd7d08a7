//! Domain events raised inside a unit of work and published after commit.

use crate::domain::Trade;

/// Events on the process-wide bus. Subscribers never observe effects of an
/// uncommitted transaction; the unit of work buffers these until commit.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    TradeCreated(Trade),
}
