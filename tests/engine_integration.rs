//! Engine-level tests against a mocked trading API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Duration;

use quoteforge::config::{EmergencyAction, MarketMakerConfig};
use quoteforge::context::MarketContext;
use quoteforge::engine::{EngineState, Orchestrator};
use quoteforge::exchange::{
    AmendRequest, CancelRequest, ExchangeError, OrderAck, PlaceRequest, TradingApi,
};
use quoteforge::feeds::feed_channels;
use quoteforge::orders::{
    ClientOrderId, OrderReconciler, OrderState, OrderUpdate, ReconcilerConfig,
};
use quoteforge::strategy::{Quote, StrategyDecision};
use quoteforge::types::{BookLevel, Instrument, OrderBook, OrderSide};

// --- Mocks ---

mock! {
    pub Venue {}

    #[async_trait]
    impl TradingApi for Venue {
        async fn instrument(&self, inst_id: &str) -> Result<Instrument, ExchangeError>;
        async fn pending_orders(&self, inst_id: &str) -> Result<Vec<OrderUpdate>, ExchangeError>;
        async fn place_orders(&self, orders: &[PlaceRequest]) -> Result<Vec<OrderAck>, ExchangeError>;
        async fn amend_orders(&self, amends: &[AmendRequest]) -> Result<Vec<OrderAck>, ExchangeError>;
        async fn cancel_orders(&self, cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError>;
        async fn order_status(
            &self,
            inst_id: &str,
            cl_ord_id: &ClientOrderId,
        ) -> Result<Option<OrderUpdate>, ExchangeError>;
    }
}

fn live_bid(id: &str, price: Decimal) -> OrderUpdate {
    OrderUpdate {
        cl_ord_id: id.into(),
        ord_id: Some(format!("x-{id}")),
        side: OrderSide::Buy,
        price,
        size: dec!(1),
        filled_size: Decimal::ZERO,
        avg_fill_price: None,
        state: OrderState::Live,
    }
}

/// Venue that reports one working bid at startup.
fn venue_with_working_order() -> MockVenue {
    let mut venue = MockVenue::new();
    venue
        .expect_instrument()
        .returning(|inst_id| Ok(Instrument::fallback(inst_id)));
    venue
        .expect_pending_orders()
        .returning(|_| Ok(vec![live_bid("mm000001000001", dec!(49000))]));
    venue.expect_place_orders().never();
    venue.expect_amend_orders().never();
    venue
}

fn accept_all(cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
    Ok(cancels
        .iter()
        .map(|c| OrderAck::accepted(c.cl_ord_id.clone(), None))
        .collect())
}

fn config() -> MarketMakerConfig {
    MarketMakerConfig {
        inst_id: "BTC-USDT".to_string(),
        main_loop_interval_sec: 1.0,
        requests_per_second: 1000,
        ..MarketMakerConfig::default()
    }
}

// --- Tests ---

#[tokio::test(start_paused = true)]
async fn test_emergency_halt_cancels_exactly_once() {
    let mut venue = venue_with_working_order();
    venue.expect_cancel_orders().times(1).returning(accept_all);
    venue.expect_order_status().never();

    let config = MarketMakerConfig {
        emergency_stop_after: 3,
        emergency_action: EmergencyAction::Halt,
        ..config()
    };
    // Feeds stay silent for the whole run
    let (_senders, channels) = feed_channels(16);
    let (engine, handle) = Orchestrator::new(config, Arc::new(venue), channels).unwrap();
    let mut states = handle.subscribe();

    let run = tokio::spawn(engine.run());
    tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("engine should halt on its own")
        .unwrap()
        .unwrap();

    assert_eq!(handle.state(), EngineState::Stopped);
    assert_eq!(*states.borrow_and_update(), EngineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_emergency_cancel_retried_before_stop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let mut venue = venue_with_working_order();
    venue.expect_cancel_orders().times(2).returning(move |cancels| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ExchangeError::Transport("gateway timeout".into()))
        } else {
            accept_all(cancels)
        }
    });
    venue.expect_order_status().never();

    let config = MarketMakerConfig {
        emergency_stop_after: 3,
        emergency_action: EmergencyAction::Halt,
        ..config()
    };
    let (_senders, channels) = feed_channels(16);
    let (engine, handle) = Orchestrator::new(config, Arc::new(venue), channels).unwrap();

    tokio::time::timeout(Duration::from_secs(30), engine.run())
        .await
        .expect("engine should halt on its own")
        .unwrap();

    assert_eq!(handle.state(), EngineState::Stopped);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_retries_cancel_all() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let mut venue = venue_with_working_order();
    venue.expect_cancel_orders().times(2).returning(move |cancels| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ExchangeError::Transport("connection reset".into()))
        } else {
            accept_all(cancels)
        }
    });

    let config = MarketMakerConfig {
        emergency_stop_after: 1000,
        ..config()
    };
    let (_senders, channels) = feed_channels(16);
    let (engine, handle) = Orchestrator::new(config, Arc::new(venue), channels).unwrap();

    let run = tokio::spawn(engine.run());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.state(), EngineState::Paused);

    handle.shutdown();
    run.await.unwrap().unwrap();
    assert_eq!(handle.state(), EngineState::Stopped);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reconcile_amends_moved_bid() {
    let mut venue = MockVenue::new();
    venue
        .expect_amend_orders()
        .times(1)
        .withf(|amends| {
            amends.len() == 1
                && amends[0].cl_ord_id.as_str() == "mm1"
                && amends[0].new_price == Some(dec!(100.05))
        })
        .returning(|amends| {
            Ok(amends
                .iter()
                .map(|a| OrderAck::accepted(a.cl_ord_id.clone(), None))
                .collect())
        });
    venue.expect_place_orders().never();
    venue.expect_cancel_orders().never();

    let ctx = Arc::new(MarketContext::new("BTC-USDT"));
    ctx.update_orderbook(OrderBook::new(
        "BTC-USDT",
        vec![BookLevel::new(dec!(100.00), dec!(1))],
        vec![BookLevel::new(dec!(100.20), dec!(1))],
    ))
    .await;
    ctx.upsert_order(live_bid("mm1", dec!(100.00))).await.unwrap();

    let reconciler = OrderReconciler::new(Arc::new(venue), ctx.clone(), ReconcilerConfig::default());
    let decision = StrategyDecision::quotes(vec![Quote::new(OrderSide::Buy, dec!(100.05), dec!(1))]);
    let report = reconciler.reconcile(&decision, &ctx.snapshot().await).await;

    assert_eq!(report.amended, 1);
    assert_eq!(report.placed + report.canceled, 0);
    let snapshot = ctx.snapshot().await;
    assert_eq!(snapshot.orders[&ClientOrderId::new("mm1")].price, dec!(100.05));
}
