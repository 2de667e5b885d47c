//! Property-based tests for quoting and reconciliation
//!
//! These tests use proptest to check invariants of the grid ladder, the order
//! lifecycle and the reconciler across many random books.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use quoteforge::context::{MarketContext, MarketSnapshot};
use quoteforge::exchange::{
    AmendRequest, CancelRequest, ExchangeError, OrderAck, PlaceRequest, TradingApi,
};
use quoteforge::orders::{
    ClientOrderId, OrderReconciler, OrderState, OrderUpdate, ReconcilerConfig, StrategyOrder,
};
use quoteforge::risk::RiskSnapshot;
use quoteforge::strategy::{GridStrategy, QuoteParams, QuoteStrategy};
use quoteforge::types::{BookLevel, Instrument, OrderBook, OrderSide};

/// Venue that must never be called: planning is pure.
struct NoVenue;

#[async_trait]
impl TradingApi for NoVenue {
    async fn instrument(&self, inst_id: &str) -> Result<Instrument, ExchangeError> {
        Ok(Instrument::fallback(inst_id))
    }

    async fn pending_orders(&self, _inst_id: &str) -> Result<Vec<OrderUpdate>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn place_orders(&self, _orders: &[PlaceRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        unreachable!("planning must not place")
    }

    async fn amend_orders(&self, _amends: &[AmendRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        unreachable!("planning must not amend")
    }

    async fn cancel_orders(&self, _cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        unreachable!("planning must not cancel")
    }

    async fn order_status(
        &self,
        _inst_id: &str,
        _cl_ord_id: &ClientOrderId,
    ) -> Result<Option<OrderUpdate>, ExchangeError> {
        Ok(None)
    }
}

const TICK: Decimal = dec!(0.01);

fn snapshot(mid_ticks: i64, half_spread_ticks: i64) -> MarketSnapshot {
    let mid = Decimal::from(mid_ticks) * TICK;
    let half = Decimal::from(half_spread_ticks) * TICK;
    let mut snap = MarketSnapshot::empty("BTC-USDT");
    snap.instrument = Instrument {
        inst_id: "BTC-USDT".into(),
        tick_size: TICK,
        lot_size: dec!(0.001),
        min_size: dec!(0.001),
    };
    snap.orderbook = Some(OrderBook::new(
        "BTC-USDT",
        vec![BookLevel::new(mid - half, dec!(1))],
        vec![BookLevel::new(mid + half, dec!(1))],
    ));
    snap
}

fn grid(levels: usize, step_bps: u32) -> GridStrategy {
    GridStrategy::new(QuoteParams {
        step_pct: Decimal::from(step_bps) / dec!(10000),
        levels,
        order_size: dec!(0.5),
        max_net_buy: dec!(1000),
        max_net_sell: dec!(1000),
    })
}

fn any_state() -> impl Strategy<Value = OrderState> {
    prop_oneof![
        Just(OrderState::Pending),
        Just(OrderState::Sent),
        Just(OrderState::Ack),
        Just(OrderState::Live),
        Just(OrderState::Filled),
        Just(OrderState::Canceled),
        Just(OrderState::Rejected),
    ]
}

proptest! {
    /// Buys sit below mid, sells above, and each level mirrors its
    /// counterpart within one tick of rounding
    #[test]
    fn grid_is_symmetric_around_mid(
        mid_ticks in 1_000_000i64..10_000_000i64,
        half_spread in 1i64..50,
        levels in 1usize..6,
        step_bps in 5u32..100,
    ) {
        let snap = snapshot(mid_ticks, half_spread);
        let mid = snap.mid_price().unwrap();
        let decision = grid(levels, step_bps).compute_quotes(&snap, &RiskSnapshot::flat());

        let bids: Vec<Decimal> = decision.quotes_on(OrderSide::Buy).map(|q| q.price).collect();
        let asks: Vec<Decimal> = decision.quotes_on(OrderSide::Sell).map(|q| q.price).collect();
        prop_assert_eq!(bids.len(), levels);
        prop_assert_eq!(asks.len(), levels);

        for (bid, ask) in bids.iter().zip(&asks) {
            prop_assert!(*bid < mid && *ask > mid);
            prop_assert!(((mid - bid) - (ask - mid)).abs() <= TICK);
        }
        prop_assert!(bids.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(asks.windows(2).all(|w| w[0] < w[1]));
    }

    /// Lifecycle rank never decreases and terminal states absorb
    #[test]
    fn order_state_never_regresses(steps in prop::collection::vec(any_state(), 1..20)) {
        let mut order = StrategyOrder::pending("mm1".into(), OrderSide::Buy, dec!(100), dec!(1));
        for next in steps {
            let before = order.state;
            let applied = order.transition(next).is_ok();
            if before.is_terminal() {
                prop_assert!(!applied);
                prop_assert_eq!(order.state, before);
            } else {
                prop_assert_eq!(applied, next.rank() >= before.rank());
            }
            prop_assert!(order.state.rank() >= before.rank());
        }
    }

    /// Once working orders equal the desired quotes, planning yields nothing
    #[test]
    fn reconcile_is_idempotent(
        mid_ticks in 1_000_000i64..10_000_000i64,
        levels in 1usize..5,
        step_bps in 5u32..100,
    ) {
        let snap = snapshot(mid_ticks, 5);
        let decision = grid(levels, step_bps).compute_quotes(&snap, &RiskSnapshot::flat());

        let mut live = snap.clone();
        for (i, quote) in decision.quotes.iter().enumerate() {
            let mut order = StrategyOrder::pending(
                ClientOrderId::new(format!("mm{i}")),
                quote.side,
                quote.price,
                quote.size,
            );
            order.state = OrderState::Live;
            live.orders.insert(order.cl_ord_id.clone(), order);
        }

        let reconciler = OrderReconciler::new(
            Arc::new(NoVenue),
            Arc::new(MarketContext::new("BTC-USDT")),
            ReconcilerConfig::default(),
        );
        prop_assert_eq!(reconciler.plan(&decision, &snap).len(), decision.quotes.len());
        prop_assert!(reconciler.plan(&decision, &live).is_empty());
    }
}
