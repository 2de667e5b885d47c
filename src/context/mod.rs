//! Shared Market Context
//!
//! The single mutable state shared between the feed ingestors, the strategy
//! loop and the order reconciler.
//!
//! # Concurrency
//!
//! All state sits behind one `tokio::sync::RwLock`. Tokio's lock is fair:
//! writers that cannot acquire the guard immediately queue in FIFO order, so
//! a busy order book feed cannot starve the private feeds. Critical sections
//! only copy or replace values, they never span a network call.
//!
//! Consumers never hold the guard; they work on a [`MarketSnapshot`].

mod fills;
mod snapshot;

pub use fills::FillLedger;
pub use snapshot::MarketSnapshot;

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::orders::{ClientOrderId, OrderState, OrderStateError, OrderUpdate, StrategyOrder};
use crate::types::{AccountBalance, Instrument, OrderBook, Position, Ticker};

/// Number of mid prices kept for status reporting.
const MID_HISTORY: usize = 100;

/// Number of removed order ids remembered to reject late reports.
const RETIRED_HISTORY: usize = 1024;

/// Independent data streams feeding the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    OrderBook,
    Ticker,
    Account,
    Positions,
    Orders,
}

impl FeedKind {
    pub const ALL: [FeedKind; 5] = [
        FeedKind::OrderBook,
        FeedKind::Ticker,
        FeedKind::Account,
        FeedKind::Positions,
        FeedKind::Orders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::OrderBook => "orderbook",
            FeedKind::Ticker => "ticker",
            FeedKind::Account => "account",
            FeedKind::Positions => "positions",
            FeedKind::Orders => "orders",
        }
    }

    fn index(&self) -> usize {
        match self {
            FeedKind::OrderBook => 0,
            FeedKind::Ticker => 1,
            FeedKind::Account => 2,
            FeedKind::Positions => 3,
            FeedKind::Orders => 4,
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last update time per feed. Never moves backward.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedClock {
    stamps: [Option<Instant>; 5],
}

impl FeedClock {
    pub fn record(&mut self, feed: FeedKind, at: Instant) {
        let slot = &mut self.stamps[feed.index()];
        *slot = Some(match *slot {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    pub fn last_update(&self, feed: FeedKind) -> Option<Instant> {
        self.stamps[feed.index()]
    }
}

/// What `upsert_order` did with an exchange report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Previously unknown order now tracked
    Inserted,
    Updated { from: OrderState, to: OrderState },
    /// Terminal report for an order we no longer track
    Ignored,
}

#[derive(Debug)]
struct MarketState {
    inst_id: String,
    orderbook: Option<OrderBook>,
    ticker: Option<Ticker>,
    instrument: Instrument,
    balance: Option<AccountBalance>,
    positions: Vec<Position>,
    orders: HashMap<ClientOrderId, StrategyOrder>,
    feeds: FeedClock,
    recent_mids: VecDeque<Decimal>,
    fills: FillLedger,
    retired: RetiredOrders,
}

/// Final states of orders already dropped from the working set, oldest
/// evicted first.
#[derive(Debug, Default)]
struct RetiredOrders {
    order: VecDeque<ClientOrderId>,
    states: HashMap<ClientOrderId, OrderState>,
}

impl RetiredOrders {
    fn retire(&mut self, id: ClientOrderId, state: OrderState) {
        if self.states.insert(id.clone(), state).is_some() {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > RETIRED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &ClientOrderId) -> Option<OrderState> {
        self.states.get(id).copied()
    }
}

/// Shared market and account state for one instrument.
#[derive(Debug)]
pub struct MarketContext {
    state: RwLock<MarketState>,
}

impl MarketContext {
    pub fn new(inst_id: impl Into<String>) -> Self {
        let inst_id = inst_id.into();
        Self {
            state: RwLock::new(MarketState {
                instrument: Instrument::fallback(inst_id.clone()),
                inst_id,
                orderbook: None,
                ticker: None,
                balance: None,
                positions: Vec::new(),
                orders: HashMap::new(),
                feeds: FeedClock::default(),
                recent_mids: VecDeque::with_capacity(MID_HISTORY),
                fills: FillLedger::default(),
                retired: RetiredOrders::default(),
            }),
        }
    }

    pub async fn set_instrument(&self, instrument: Instrument) {
        let mut state = self.state.write().await;
        info!(
            inst_id = %instrument.inst_id,
            tick_size = %instrument.tick_size,
            lot_size = %instrument.lot_size,
            min_size = %instrument.min_size,
            "Instrument loaded"
        );
        state.instrument = instrument;
    }

    pub async fn update_orderbook(&self, book: OrderBook) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if let Some(mid) = book.mid_price() {
            if state.recent_mids.len() == MID_HISTORY {
                state.recent_mids.pop_front();
            }
            state.recent_mids.push_back(mid);
        }
        state.orderbook = Some(book);
        state.feeds.record(FeedKind::OrderBook, now);
    }

    pub async fn update_ticker(&self, ticker: Ticker) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.ticker = Some(ticker);
        state.feeds.record(FeedKind::Ticker, now);
    }

    pub async fn update_balance(&self, balance: AccountBalance) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.balance = Some(balance);
        state.feeds.record(FeedKind::Account, now);
    }

    /// Replaces the position set. Flat positions are dropped.
    pub async fn update_positions(&self, positions: Vec<Position>) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.positions = positions
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .collect();
        state.feeds.record(FeedKind::Positions, now);
    }

    /// Applies an exchange-reported order state.
    ///
    /// Regressive or post-terminal updates are logged and discarded. Fill
    /// progress is booked into the fill ledger.
    pub async fn upsert_order(&self, update: OrderUpdate) -> Result<UpsertOutcome, OrderStateError> {
        let now = Instant::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.feeds.record(FeedKind::Orders, now);

        let Some(order) = state.orders.get_mut(&update.cl_ord_id) else {
            if let Some(last) = state.retired.get(&update.cl_ord_id) {
                if update.state.is_terminal() {
                    return Ok(UpsertOutcome::Ignored);
                }
                warn!(
                    cl_ord_id = %update.cl_ord_id,
                    current = %last,
                    reported = %update.state,
                    "Discarding update for retired order"
                );
                return Err(OrderStateError::InvalidTransition(
                    update.cl_ord_id,
                    last,
                    update.state,
                ));
            }
            if update.state.is_terminal() {
                debug!(cl_ord_id = %update.cl_ord_id, state = %update.state, "Terminal update for untracked order ignored");
                return Ok(UpsertOutcome::Ignored);
            }
            info!(
                cl_ord_id = %update.cl_ord_id,
                side = %update.side,
                price = %update.price,
                size = %update.size,
                state = %update.state,
                "Tracking order reported by exchange"
            );
            state
                .orders
                .insert(update.cl_ord_id.clone(), StrategyOrder::from_update(&update));
            return Ok(UpsertOutcome::Inserted);
        };

        let from = order.state;
        if let Err(e) = order.transition(update.state) {
            warn!(
                cl_ord_id = %update.cl_ord_id,
                current = %from,
                reported = %update.state,
                "Discarding out-of-order order update"
            );
            return Err(e);
        }

        if order.ord_id.is_none() {
            order.ord_id = update.ord_id.clone();
        }
        if update.price > Decimal::ZERO {
            order.price = update.price;
        }
        if update.size > Decimal::ZERO {
            order.size = update.size;
        }

        let delta = update.filled_size - order.filled_size;
        if delta > Decimal::ZERO {
            let fill_price = incremental_fill_price(order, &update, delta);
            state.fills.record(order.side, delta, fill_price);
            order.filled_size = update.filled_size;
            order.avg_fill_price = update.avg_fill_price.or(Some(fill_price));
            info!(
                cl_ord_id = %order.cl_ord_id,
                side = %order.side,
                fill_size = %delta,
                fill_price = %fill_price,
                filled = %order.filled_size,
                "Order filled"
            );
        }

        if from != order.state {
            info!(cl_ord_id = %order.cl_ord_id, old_state = %from, new_state = %order.state, "Order state updated");
        }
        Ok(UpsertOutcome::Updated {
            from,
            to: order.state,
        })
    }

    /// Registers a freshly planned order. Ids must be unique.
    pub async fn insert_pending(&self, order: StrategyOrder) -> Result<(), OrderStateError> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.cl_ord_id) || state.retired.get(&order.cl_ord_id).is_some() {
            return Err(OrderStateError::DuplicateId(order.cl_ord_id));
        }
        state.orders.insert(order.cl_ord_id.clone(), order);
        Ok(())
    }

    /// PENDING -> SENT, stamped with the send time.
    pub async fn mark_sent(&self, id: &ClientOrderId) -> Result<(), OrderStateError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| OrderStateError::UnknownOrder(id.clone()))?;
        order.transition(OrderState::Sent)?;
        order.sent_at = Some(Instant::now());
        Ok(())
    }

    /// Applies a positive place acknowledgement. A no-op if the order feed
    /// already moved the order further along.
    pub async fn apply_ack(&self, id: &ClientOrderId, ord_id: Option<String>) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(id) {
            if order.ord_id.is_none() {
                order.ord_id = ord_id;
            }
            if order.state.rank() < OrderState::Ack.rank() {
                let _ = order.transition(OrderState::Ack);
            }
        }
    }

    /// Marks an order rejected by the exchange.
    pub async fn mark_rejected(&self, id: &ClientOrderId, reason: &str) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(id) {
            warn!(cl_ord_id = %id, side = %order.side, price = %order.price, reason = reason, "Order rejected");
            if let Err(e) = order.transition(OrderState::Rejected) {
                debug!(error = %e, "Rejection arrived after terminal state");
            }
        }
    }

    /// Marks an order that the exchange has no record of. It is never re-sent.
    pub async fn mark_lost(&self, id: &ClientOrderId) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(id) {
            warn!(cl_ord_id = %id, state = %order.state, "Order unknown to exchange, treating as canceled");
            let _ = order.transition(OrderState::Canceled);
        }
    }

    /// Records an accepted amend locally so the next cycle sees the new terms.
    pub async fn apply_amend(
        &self,
        id: &ClientOrderId,
        new_price: Option<Decimal>,
        new_size: Option<Decimal>,
    ) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(id) {
            if order.state.is_terminal() {
                return;
            }
            if let Some(price) = new_price {
                order.price = price;
            }
            if let Some(size) = new_size {
                order.size = size;
            }
            order.updated_at = chrono::Utc::now();
        }
    }

    /// Drops orders in a terminal state. Returns how many were removed.
    pub async fn remove_terminal_orders(&self) -> usize {
        let mut state = self.state.write().await;
        let MarketState { orders, retired, .. } = &mut *state;
        let before = orders.len();
        orders.retain(|id, o| {
            if o.state.is_terminal() {
                retired.retire(id.clone(), o.state);
                false
            } else {
                true
            }
        });
        let removed = before - orders.len();
        if removed > 0 {
            debug!(removed, "Removed terminal orders");
        }
        removed
    }

    pub async fn snapshot(&self) -> MarketSnapshot {
        let state = self.state.read().await;
        MarketSnapshot {
            inst_id: state.inst_id.clone(),
            orderbook: state.orderbook.clone(),
            ticker: state.ticker.clone(),
            instrument: state.instrument.clone(),
            balance: state.balance.clone(),
            positions: state.positions.clone(),
            orders: state.orders.clone(),
            feeds: state.feeds,
            recent_mids: state.recent_mids.iter().copied().collect(),
            fills: state.fills.clone(),
            taken_at: Instant::now(),
        }
    }
}

/// Price of the newest fill, derived from the cumulative average when the
/// exchange reports one.
fn incremental_fill_price(order: &StrategyOrder, update: &OrderUpdate, delta: Decimal) -> Decimal {
    match (update.avg_fill_price, order.avg_fill_price) {
        (Some(new_avg), Some(old_avg)) => {
            (new_avg * update.filled_size - old_avg * order.filled_size) / delta
        }
        (Some(new_avg), None) if order.filled_size.is_zero() => new_avg,
        _ => order.price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookLevel, OrderSide};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn update(id: &str, state: OrderState, filled: Decimal) -> OrderUpdate {
        OrderUpdate {
            cl_ord_id: id.into(),
            ord_id: Some("ex-1".into()),
            side: OrderSide::Buy,
            price: dec!(100),
            size: dec!(1),
            filled_size: filled,
            avg_fill_price: if filled.is_zero() { None } else { Some(dec!(100)) },
            state,
        }
    }

    async fn context_with_sent_order(id: &str) -> MarketContext {
        let ctx = MarketContext::new("BTC-USDT");
        ctx.insert_pending(StrategyOrder::pending(id.into(), OrderSide::Buy, dec!(100), dec!(1)))
            .await
            .unwrap();
        ctx.mark_sent(&id.into()).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let ctx = context_with_sent_order("mm1").await;

        ctx.apply_ack(&"mm1".into(), Some("ex-1".into())).await;
        ctx.upsert_order(update("mm1", OrderState::Live, dec!(0))).await.unwrap();
        let outcome = ctx
            .upsert_order(update("mm1", OrderState::Filled, dec!(1)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Updated {
                from: OrderState::Live,
                to: OrderState::Filled
            }
        );

        let snap = ctx.snapshot().await;
        assert_eq!(snap.fills.bought, dec!(1));
        assert_eq!(snap.orders[&ClientOrderId::new("mm1")].ord_id.as_deref(), Some("ex-1"));

        assert_eq!(ctx.remove_terminal_orders().await, 1);
        assert!(ctx.snapshot().await.orders.is_empty());
    }

    #[tokio::test]
    async fn test_regressive_update_discarded() {
        let ctx = context_with_sent_order("mm1").await;
        ctx.upsert_order(update("mm1", OrderState::Live, dec!(0))).await.unwrap();

        let result = ctx.upsert_order(update("mm1", OrderState::Ack, dec!(0))).await;
        assert!(matches!(result, Err(OrderStateError::InvalidTransition(..))));
        assert_eq!(
            ctx.snapshot().await.orders[&ClientOrderId::new("mm1")].state,
            OrderState::Live
        );
    }

    #[tokio::test]
    async fn test_terminal_state_immutable() {
        let ctx = context_with_sent_order("mm1").await;
        ctx.upsert_order(update("mm1", OrderState::Canceled, dec!(0))).await.unwrap();

        assert!(ctx
            .upsert_order(update("mm1", OrderState::Filled, dec!(1)))
            .await
            .is_err());
        let snap = ctx.snapshot().await;
        assert_eq!(snap.orders[&ClientOrderId::new("mm1")].state, OrderState::Canceled);
        assert_eq!(snap.fills.bought, dec!(0));
    }

    #[tokio::test]
    async fn test_removed_order_stays_retired() {
        let ctx = context_with_sent_order("mm1").await;
        ctx.upsert_order(update("mm1", OrderState::Canceled, dec!(0))).await.unwrap();
        assert_eq!(ctx.remove_terminal_orders().await, 1);

        // A late LIVE report must not resurrect the order
        let late = ctx.upsert_order(update("mm1", OrderState::Live, dec!(0))).await;
        assert!(matches!(
            late,
            Err(OrderStateError::InvalidTransition(_, OrderState::Canceled, OrderState::Live))
        ));
        assert_eq!(
            ctx.upsert_order(update("mm1", OrderState::Canceled, dec!(0))).await.unwrap(),
            UpsertOutcome::Ignored
        );
        assert!(ctx.snapshot().await.orders.is_empty());

        let reused = StrategyOrder::pending("mm1".into(), OrderSide::Buy, dec!(100), dec!(1));
        assert!(matches!(
            ctx.insert_pending(reused).await,
            Err(OrderStateError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_lost_order_retired_on_cleanup() {
        let ctx = context_with_sent_order("mm2").await;
        ctx.mark_lost(&"mm2".into()).await;
        assert_eq!(ctx.remove_terminal_orders().await, 1);
        assert!(ctx.upsert_order(update("mm2", OrderState::Live, dec!(0))).await.is_err());
        assert!(ctx.snapshot().await.orders.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let ctx = context_with_sent_order("mm1").await;
        let dup = StrategyOrder::pending("mm1".into(), OrderSide::Sell, dec!(101), dec!(1));
        assert_eq!(
            ctx.insert_pending(dup).await,
            Err(OrderStateError::DuplicateId("mm1".into()))
        );
    }

    #[tokio::test]
    async fn test_unknown_live_order_is_tracked() {
        let ctx = MarketContext::new("BTC-USDT");
        let outcome = ctx.upsert_order(update("ext1", OrderState::Live, dec!(0))).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = ctx
            .upsert_order(update("gone", OrderState::Canceled, dec!(0)))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Ignored);
        assert_eq!(ctx.snapshot().await.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_fills_booked_incrementally() {
        let ctx = context_with_sent_order("mm1").await;
        let mut partial = update("mm1", OrderState::Live, dec!(0.4));
        partial.avg_fill_price = Some(dec!(100));
        ctx.upsert_order(partial).await.unwrap();

        let mut rest = update("mm1", OrderState::Filled, dec!(1));
        rest.avg_fill_price = Some(dec!(100.6));
        ctx.upsert_order(rest).await.unwrap();

        let fills = ctx.snapshot().await.fills;
        assert_eq!(fills.bought, dec!(1));
        // 0.4 @ 100 + 0.6 @ 101
        assert_eq!(fills.buy_notional, dec!(100.6));
    }

    #[tokio::test]
    async fn test_feed_timestamps_recorded() {
        tokio::time::pause();
        let ctx = MarketContext::new("BTC-USDT");
        assert!(ctx.snapshot().await.last_update(FeedKind::OrderBook).is_none());

        let book = OrderBook::new(
            "BTC-USDT",
            vec![BookLevel::new(dec!(99), dec!(1))],
            vec![BookLevel::new(dec!(101), dec!(1))],
        );
        ctx.update_orderbook(book.clone()).await;
        let first = ctx.snapshot().await.last_update(FeedKind::OrderBook).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        ctx.update_orderbook(book).await;
        let snap = ctx.snapshot().await;
        assert!(snap.last_update(FeedKind::OrderBook).unwrap() > first);
        assert_eq!(snap.recent_mids, vec![dec!(100), dec!(100)]);
        assert!(snap.last_update(FeedKind::Ticker).is_none());
    }

    #[test]
    fn test_feed_clock_never_moves_backward() {
        let mut clock = FeedClock::default();
        let later = Instant::now();
        let earlier = later - Duration::from_secs(1);
        clock.record(FeedKind::Account, later);
        clock.record(FeedKind::Account, earlier);
        assert_eq!(clock.last_update(FeedKind::Account), Some(later));
    }
}
