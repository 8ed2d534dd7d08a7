//! Entry matcher: resolves an outflow against historical unused inflows.
//!
//! Two independent streams feed the matcher: unused order inflows and unused
//! deposit inflows for one (trader, exchange, asset). Both are consumed
//! newest-first and merged into a single descending-by-time sequence until
//! the requested quantity is covered; the final entry is split so the
//! returned quantities sum exactly.

use crate::db::repo::{orders, transfers};
use crate::domain::{Asset, Decimal, ExchangeId, Side, SourceType, TimeMs, TraderId};
use crate::error::CoreError;
use crate::exchange::ExchangeGateway;
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use std::collections::VecDeque;

/// Keyset pagination cursor over (time_ms, id), descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub time: TimeMs,
    pub row_id: i64,
}

/// What kind of inflow an entry came from, with the pricing context the
/// quote-asset resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOrigin {
    Order { side: Side, quote_asset: Asset },
    Deposit,
}

/// One unused inflow row as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflowRecord {
    pub row_id: i64,
    pub source_id: String,
    pub quantity_unused: Decimal,
    pub time: TimeMs,
    pub origin: EntryOrigin,
}

/// One matched entry: a portion of an inflow consumed by an outflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedEntry {
    pub source_id: String,
    pub quantity: Decimal,
    pub time: TimeMs,
    pub origin: EntryOrigin,
}

impl MatchedEntry {
    pub fn source_type(&self) -> SourceType {
        match self.origin {
            EntryOrigin::Order { .. } => SourceType::Order,
            EntryOrigin::Deposit => SourceType::Deposit,
        }
    }
}

/// Paged access to the two unused-inflow streams for one
/// (trader, exchange, asset). Each call returns rows strictly older than the
/// cursor, newest first.
#[async_trait]
pub trait InflowSource {
    async fn orders_page(
        &mut self,
        max_time: TimeMs,
        cursor: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<InflowRecord>, CoreError>;

    async fn deposits_page(
        &mut self,
        max_time: TimeMs,
        cursor: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<InflowRecord>, CoreError>;
}

/// Inflow streams backed by the orders and transfers tables, scoped to the
/// caller's transaction.
///
/// `exclude_order` hides one order from the order stream; an order-derived
/// outflow must never match the row that produced it.
pub struct DbInflowSource<'c> {
    conn: &'c mut SqliteConnection,
    trader_id: TraderId,
    exchange_id: ExchangeId,
    asset: Asset,
    exclude_order: Option<String>,
}

impl<'c> DbInflowSource<'c> {
    pub fn new(
        conn: &'c mut SqliteConnection,
        trader_id: &TraderId,
        exchange_id: &ExchangeId,
        asset: &Asset,
        exclude_order: Option<&str>,
    ) -> Self {
        DbInflowSource {
            conn,
            trader_id: trader_id.clone(),
            exchange_id: exchange_id.clone(),
            asset: asset.clone(),
            exclude_order: exclude_order.map(str::to_string),
        }
    }
}

#[async_trait]
impl<'c> InflowSource for DbInflowSource<'c> {
    async fn orders_page(
        &mut self,
        max_time: TimeMs,
        cursor: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<InflowRecord>, CoreError> {
        orders::unused_page(
            self.conn,
            &self.trader_id,
            &self.exchange_id,
            &self.asset,
            max_time,
            cursor,
            limit,
            self.exclude_order.as_deref(),
        )
        .await
    }

    async fn deposits_page(
        &mut self,
        max_time: TimeMs,
        cursor: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<InflowRecord>, CoreError> {
        transfers::unused_deposits_page(
            self.conn,
            &self.trader_id,
            &self.exchange_id,
            &self.asset,
            max_time,
            cursor,
            limit,
        )
        .await
    }
}

/// Buffered state of one inflow stream during a resolve.
struct StreamState {
    buf: VecDeque<InflowRecord>,
    cursor: Option<PageCursor>,
    exhausted: bool,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            buf: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    fn needs_refill(&self) -> bool {
        self.buf.is_empty() && !self.exhausted
    }

    fn accept(&mut self, page: Vec<InflowRecord>, limit: i64) {
        if (page.len() as i64) < limit {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(PageCursor {
                time: last.time,
                row_id: last.row_id,
            });
        }
        self.buf.extend(page);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Orders,
    Deposits,
}

/// FIFO-style merge matcher over the two inflow streams.
#[derive(Debug, Clone)]
pub struct EntryMatcher {
    fetch_limit: i64,
}

impl EntryMatcher {
    pub fn new(fetch_limit: i64) -> Self {
        EntryMatcher { fetch_limit }
    }

    /// Consume unused inflows, newest first, until `qty` is covered.
    ///
    /// Every consumed inflow contributes its full unused quantity except the
    /// last, which is trimmed so the result sums to exactly `qty`. Fails with
    /// `InsufficientEntries` when both streams are exhausted short of `qty`.
    pub async fn resolve(
        &self,
        source: &mut dyn InflowSource,
        qty: Decimal,
        before: TimeMs,
    ) -> Result<Vec<MatchedEntry>, CoreError> {
        if !qty.is_positive() {
            return Err(CoreError::Validation(format!(
                "matched quantity must be positive, got {}",
                qty
            )));
        }

        let mut order_stream = StreamState::new();
        let mut deposit_stream = StreamState::new();
        let mut entries: Vec<MatchedEntry> = Vec::new();
        let mut total = Decimal::zero();

        while total < qty {
            if order_stream.needs_refill() {
                let page = source
                    .orders_page(before, order_stream.cursor.as_ref(), self.fetch_limit)
                    .await?;
                order_stream.accept(page, self.fetch_limit);
            }
            if deposit_stream.needs_refill() {
                let page = source
                    .deposits_page(before, deposit_stream.cursor.as_ref(), self.fetch_limit)
                    .await?;
                deposit_stream.accept(page, self.fetch_limit);
            }

            let record = match pick_newest(&mut order_stream, &mut deposit_stream) {
                Some(record) => record,
                None => break,
            };

            total = total + record.quantity_unused;
            entries.push(MatchedEntry {
                source_id: record.source_id,
                quantity: record.quantity_unused,
                time: record.time,
                origin: record.origin,
            });
        }

        if total < qty {
            return Err(CoreError::InsufficientEntries(format!(
                "have {} unused, need {}",
                total, qty
            )));
        }

        let surplus = total - qty;
        if surplus.is_positive() {
            if let Some(last) = entries.last_mut() {
                last.quantity = last.quantity - surplus;
            }
        }

        Ok(entries)
    }

    /// The quote asset to price an entry in.
    ///
    /// Root assets price in themselves. Buy-order entries price in the
    /// order's own quote asset. Sell-order and deposit entries have no
    /// attached market, so the exchange picks one near the preferred quote.
    pub async fn resolve_quote_asset(
        &self,
        entry: &MatchedEntry,
        gateway: &dyn ExchangeGateway,
        exchange_id: &ExchangeId,
        asset: &Asset,
        preferred_quote_asset: &Asset,
    ) -> Result<Asset, CoreError> {
        if gateway.is_root_asset(exchange_id, asset).await? {
            return Ok(asset.clone());
        }

        match &entry.origin {
            EntryOrigin::Order {
                side: Side::Buy,
                quote_asset,
            } => Ok(quote_asset.clone()),
            EntryOrigin::Order {
                side: Side::Sell, ..
            }
            | EntryOrigin::Deposit => {
                gateway
                    .find_market_quote_asset(exchange_id, asset, preferred_quote_asset)
                    .await
            }
        }
    }
}

/// Pop the globally newest buffered record. A stream with an empty buffer
/// that is not exhausted never reaches here; the caller refills first. Ties
/// on (time, row id) go to the order stream.
fn pick_newest(
    order_stream: &mut StreamState,
    deposit_stream: &mut StreamState,
) -> Option<InflowRecord> {
    let kind = match (order_stream.buf.front(), deposit_stream.buf.front()) {
        (None, None) => return None,
        (Some(_), None) => StreamKind::Orders,
        (None, Some(_)) => StreamKind::Deposits,
        (Some(o), Some(d)) => {
            if (o.time, o.row_id) >= (d.time, d.row_id) {
                StreamKind::Orders
            } else {
                StreamKind::Deposits
            }
        }
    };

    match kind {
        StreamKind::Orders => order_stream.buf.pop_front(),
        StreamKind::Deposits => deposit_stream.buf.pop_front(),
    }
}
