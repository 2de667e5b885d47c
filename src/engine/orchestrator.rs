//! Coordinator main loop.
//!
//! Owns the feed ingestor tasks and drives one strategy/reconcile cycle per
//! `main_loop_interval`:
//!
//! 1. Snapshot the context and check feed freshness. Stale data skips the
//!    cycle and pauses the engine; `emergency_stop_after` stale cycles in a
//!    row trigger the emergency stop (cancel-all once, then halt or hold).
//! 2. Compute risk, ask the strategy for a decision, reconcile it.
//! 3. Resolve unconfirmed requests, drop terminal orders, publish status.
//!
//! On shutdown every tracked order is canceled (with retries) unless an
//! emergency halt already canceled them cleanly; the feed tasks are stopped
//! and joined within `shutdown_timeout`, and stragglers are aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{EngineError, EngineState};
use crate::config::{EmergencyAction, MarketMakerConfig};
use crate::context::{FeedKind, MarketContext, MarketSnapshot};
use crate::exchange::TradingApi;
use crate::feeds::{spawn_ingestors, FeedChannels};
use crate::health::{update_health, HealthChecker, HealthSample, HealthState, HealthThresholds};
use crate::logging::LogThrottle;
use crate::metrics;
use crate::orders::{OrderReconciler, ReconcileReport, ReconcilerConfig};
use crate::risk::{RiskCalculator, RiskFlag, RiskLimits, RiskSnapshot};
use crate::strategy::{build_strategy, QuoteStrategy};
use crate::types::OrderSide;

const STALE_LOG_INTERVAL: Duration = Duration::from_secs(10);
const CANCEL_RETRY_BACKOFF: Duration = Duration::from_millis(250);

enum CycleOutcome {
    Continue,
    Halt,
}

/// Outside view of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shutdown: CancellationToken,
    resume: Arc<AtomicBool>,
    state_rx: watch::Receiver<EngineState>,
}

impl EngineHandle {
    /// Requests a graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Operator acknowledgement releasing an emergency pause.
    pub fn resume(&self) {
        self.resume.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Resolves once the engine reaches `state`, or immediately if the engine
    /// is gone.
    pub async fn wait_for(&self, state: EngineState) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == state).await;
    }
}

/// Market-making coordinator for one instrument.
pub struct Orchestrator<A: TradingApi + 'static> {
    config: MarketMakerConfig,
    api: Arc<A>,
    ctx: Arc<MarketContext>,
    reconciler: OrderReconciler<A>,
    strategy: Box<dyn QuoteStrategy>,
    risk: RiskCalculator,
    health: HealthChecker,
    feeds: Option<FeedChannels>,
    tasks: JoinSet<FeedKind>,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    shutdown: CancellationToken,
    /// Stops the ingestors; cancelled only after the shutdown cancel-all
    feed_token: CancellationToken,
    resume: Arc<AtomicBool>,
    emergency_fired: bool,
    /// Set until the emergency cancel-all is known to have reached every order
    emergency_cancel_pending: bool,
    stale_log: LogThrottle,
    last_breaches: Vec<RiskFlag>,
    health_state: Option<HealthState>,
}

impl<A: TradingApi + 'static> Orchestrator<A> {
    /// Validates `config` and wires the engine. Nothing runs until [`run`](Self::run).
    pub fn new(
        config: MarketMakerConfig,
        api: Arc<A>,
        feeds: FeedChannels,
    ) -> Result<(Self, EngineHandle), EngineError> {
        config.validate()?;

        let ctx = Arc::new(MarketContext::new(config.inst_id.clone()));
        let reconciler = OrderReconciler::new(api.clone(), ctx.clone(), ReconcilerConfig::from_config(&config));
        let (state_tx, state_rx) = watch::channel(EngineState::Initializing);
        let shutdown = CancellationToken::new();
        let resume = Arc::new(AtomicBool::new(false));

        let handle = EngineHandle {
            shutdown: shutdown.clone(),
            resume: resume.clone(),
            state_rx,
        };
        let engine = Self {
            strategy: build_strategy(&config),
            risk: RiskCalculator::new(RiskLimits::from_config(&config)),
            health: HealthChecker::new(HealthThresholds::from_config(&config)),
            feeds: Some(feeds),
            tasks: JoinSet::new(),
            state: EngineState::Initializing,
            state_tx,
            shutdown,
            feed_token: CancellationToken::new(),
            resume,
            emergency_fired: false,
            emergency_cancel_pending: false,
            stale_log: LogThrottle::new(STALE_LOG_INTERVAL),
            last_breaches: Vec::new(),
            health_state: None,
            config,
            api,
            ctx,
            reconciler,
        };
        Ok((engine, handle))
    }

    /// Replaces the configured strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn QuoteStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Publishes per-cycle status to the `/health` endpoint state.
    pub fn with_health_state(mut self, state: HealthState) -> Self {
        self.health_state = Some(state);
        self
    }

    pub fn context(&self) -> Arc<MarketContext> {
        self.ctx.clone()
    }

    fn set_state(&mut self, next: EngineState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "Engine state transition");
        self.state = next;
        self.state_tx.send_replace(next);
        metrics::set_engine_state(&self.config.inst_id, next.gauge_value());
    }

    /// Runs until shutdown is requested or an emergency stop halts the engine.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let feeds = self.feeds.take().ok_or(EngineError::AlreadyStarted)?;
        self.set_state(EngineState::Initializing);
        info!(
            inst_id = %self.config.inst_id,
            strategy = self.strategy.name(),
            "Starting market maker"
        );

        if let Err(e) = self.bootstrap().await {
            error!(error = %e, "Startup failed");
            self.feed_token.cancel();
            self.set_state(EngineState::Stopped);
            return Err(e);
        }
        spawn_ingestors(&self.ctx, feeds, &self.feed_token, &mut self.tasks);
        self.set_state(EngineState::Running);

        let mut ticker = tokio::time::interval(self.config.main_loop_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let budget = self.config.cycle_budget();
        let mut halted = false;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match tokio::time::timeout(budget, self.cycle()).await {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::Halt) => {
                    halted = true;
                    break;
                }
                Err(_) => {
                    warn!(budget_ms = budget.as_millis() as u64, "Cycle exceeded its time budget, abandoned");
                    metrics::record_skipped_cycle("timeout");
                    // A cut-short emergency cancel-all is still pending and finishes on shutdown
                    if self.emergency_fired && self.config.emergency_action == EmergencyAction::Halt {
                        halted = true;
                        break;
                    }
                }
            }
        }

        self.shutdown_sequence(halted).await;
        Ok(())
    }

    /// Loads the instrument trading rules and the orders already working on the venue.
    async fn bootstrap(&mut self) -> Result<(), EngineError> {
        match self.api.instrument(&self.config.inst_id).await {
            Ok(instrument) => self.ctx.set_instrument(instrument).await,
            Err(e) => warn!(error = %e, "Instrument lookup failed, using fallback tick and lot sizes"),
        }

        let pending = self.api.pending_orders(&self.config.inst_id).await?;
        let count = pending.len();
        for update in pending {
            self.ctx.upsert_order(update).await?;
        }
        info!(orders = count, "Loaded working orders from exchange");
        Ok(())
    }

    #[instrument(skip(self), name = "cycle")]
    async fn cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let snapshot = self.ctx.snapshot().await;
        let report = self.health.check(&snapshot, Instant::now());

        if !report.fresh {
            metrics::record_skipped_cycle("stale");
            if self.stale_log.should_log() {
                let names: Vec<&str> = report.stale_feeds.iter().map(FeedKind::as_str).collect();
                warn!(
                    stale = ?names,
                    consecutive = self.health.consecutive_failures(),
                    suppressed = self.stale_log.get_and_reset_suppressed_count(),
                    "Market data stale, skipping cycle"
                );
            }
            if self.state == EngineState::Running {
                self.set_state(EngineState::Paused);
            }
            let outcome = if !self.emergency_fired
                && self.health.should_emergency_stop(self.config.emergency_stop_after)
            {
                self.emergency_stop(&snapshot).await
            } else {
                CycleOutcome::Continue
            };
            self.publish_health(&snapshot, &report.stale_feeds).await;
            return outcome;
        }

        if self.emergency_fired {
            if !self.resume.swap(false, Ordering::SeqCst) {
                debug!("Holding after emergency stop until an operator resumes");
                self.publish_health(&snapshot, &[]).await;
                return CycleOutcome::Continue;
            }
            info!("Operator resumed trading after emergency stop");
            self.emergency_fired = false;
            self.emergency_cancel_pending = false;
        }
        if self.state == EngineState::Paused {
            info!("Market data fresh again, resuming");
            self.stale_log.reset();
            self.set_state(EngineState::Running);
        }

        let risk = self.risk.compute(&snapshot);
        self.log_risk_changes(&risk);

        let decision = self.strategy.compute_quotes(&snapshot, &risk);
        let reconcile = self.reconciler.reconcile(&decision, &snapshot).await;

        let after = self.ctx.snapshot().await;
        self.reconciler.sweep_unconfirmed(&after).await;
        self.ctx.remove_terminal_orders().await;

        self.log_status(&snapshot, &risk, &reconcile);
        metrics::set_risk(
            &self.config.inst_id,
            decimal_to_f64(risk.net_position),
            decimal_to_f64(risk.exposure),
        );
        metrics::record_cycle(started.elapsed().as_secs_f64());
        self.publish_health(&after, &[]).await;
        CycleOutcome::Continue
    }

    async fn emergency_stop(&mut self, snapshot: &MarketSnapshot) -> CycleOutcome {
        self.emergency_fired = true;
        self.resume.store(false, Ordering::SeqCst);
        error!(
            consecutive = self.health.consecutive_failures(),
            action = ?self.config.emergency_action,
            "EMERGENCY STOP: market data stale for too long, canceling all orders"
        );
        metrics::record_emergency_stop();

        self.emergency_cancel_pending = true;
        let report = self.reconciler.cancel_all(snapshot).await;
        info!(
            canceled = report.canceled,
            failed = report.failed,
            skipped = report.skipped,
            "Emergency cancel-all sent"
        );
        if report.failed == 0 {
            self.emergency_cancel_pending = false;
        } else {
            warn!(failed = report.failed, "Emergency cancel-all incomplete, retrying on shutdown");
        }

        match self.config.emergency_action {
            EmergencyAction::Halt => CycleOutcome::Halt,
            EmergencyAction::Pause => {
                self.set_state(EngineState::Paused);
                CycleOutcome::Continue
            }
        }
    }

    async fn shutdown_sequence(&mut self, halted: bool) {
        self.set_state(EngineState::Stopping);

        // After a clean emergency cancel-all a halt does not cancel again
        if !halted || self.emergency_cancel_pending {
            self.cancel_all_with_retries().await;
        }

        self.feed_token.cancel();
        let timeout = self.config.shutdown_timeout();
        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(feed) => debug!(feed = %feed, "Feed task joined"),
                    Err(e) if e.is_panic() => error!("Feed task panicked"),
                    Err(e) => warn!(error = %e, "Feed task failed"),
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                remaining = self.tasks.len(),
                "Feed tasks did not stop in time, aborting"
            );
            self.tasks.abort_all();
        }

        let snapshot = self.ctx.snapshot().await;
        self.publish_health(&snapshot, &[]).await;
        self.set_state(EngineState::Stopped);
        info!("Market maker stopped");
    }

    async fn cancel_all_with_retries(&mut self) {
        let attempts = self.config.shutdown_cancel_retries.max(1);
        for attempt in 1..=attempts {
            let snapshot = self.ctx.snapshot().await;
            let report = self.reconciler.cancel_all(&snapshot).await;
            if report.failed == 0 {
                info!(canceled = report.canceled, attempt, "Shutdown cancel-all complete");
                return;
            }
            warn!(
                failed = report.failed,
                attempt,
                attempts,
                "Shutdown cancel-all incomplete"
            );
            if attempt < attempts {
                tokio::time::sleep(CANCEL_RETRY_BACKOFF * attempt).await;
            }
        }
        error!("Orders may still be working on the exchange after shutdown");
    }

    fn log_risk_changes(&mut self, risk: &RiskSnapshot) {
        if risk.breaches == self.last_breaches {
            return;
        }
        if risk.breaches.is_empty() {
            info!("Risk limits back within bounds");
        } else {
            let flags: Vec<String> = risk.breaches.iter().map(ToString::to_string).collect();
            warn!(
                breaches = ?flags,
                net_position = %risk.net_position,
                exposure = %risk.exposure,
                "Risk limit breached"
            );
        }
        self.last_breaches = risk.breaches.clone();
    }

    fn log_status(&self, snapshot: &MarketSnapshot, risk: &RiskSnapshot, report: &ReconcileReport) {
        let mid = snapshot.mid_price().map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
        let vol = snapshot
            .volatility(self.config.volatility_lookback)
            .map(|v| v.round_dp(6).to_string())
            .unwrap_or_else(|| "-".to_string());
        let (bids, asks) = (
            snapshot.active_count(OrderSide::Buy),
            snapshot.active_count(OrderSide::Sell),
        );
        if report.is_noop() {
            debug!(mid = %mid, vol = %vol, bids, asks, net = %risk.net_position, "Status");
        } else {
            info!(
                mid = %mid,
                vol = %vol,
                bids,
                asks,
                net = %risk.net_position,
                upnl = %risk.unrealized_pnl.round_dp(4),
                rpnl = %risk.realized_pnl.round_dp(4),
                breaker = %self.reconciler.breaker_state(),
                "Status"
            );
        }
    }

    async fn publish_health(&self, snapshot: &MarketSnapshot, stale: &[FeedKind]) {
        let Some(state) = &self.health_state else {
            return;
        };
        update_health(
            state,
            HealthSample {
                engine_state: self.state.as_str(),
                consecutive_failures: self.health.consecutive_failures(),
                stale_feeds: stale,
                breaker: self.reconciler.breaker_state(),
                live_orders: snapshot.active_orders().count(),
                volatility: snapshot.volatility(self.config.volatility_lookback).map(decimal_to_f64),
            },
        )
        .await;
    }
}

fn decimal_to_f64(value: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::exchange::{
        AmendRequest, CancelRequest, ExchangeError, OrderAck, PaperExchange, PaperSettings, PlaceRequest,
    };
    use crate::feeds::feed_channels;
    use crate::orders::{ClientOrderId, OrderUpdate};
    use crate::types::Instrument;

    /// Paper venue whose order placement hangs while `slow` is set.
    struct SlowVenue {
        inner: Arc<PaperExchange>,
        slow: AtomicBool,
        place_calls: AtomicUsize,
    }

    #[async_trait]
    impl TradingApi for SlowVenue {
        async fn instrument(&self, inst_id: &str) -> Result<Instrument, ExchangeError> {
            self.inner.instrument(inst_id).await
        }

        async fn pending_orders(&self, inst_id: &str) -> Result<Vec<OrderUpdate>, ExchangeError> {
            self.inner.pending_orders(inst_id).await
        }

        async fn place_orders(&self, orders: &[PlaceRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.place_orders(orders).await
        }

        async fn amend_orders(&self, amends: &[AmendRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
            self.inner.amend_orders(amends).await
        }

        async fn cancel_orders(&self, cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
            self.inner.cancel_orders(cancels).await
        }

        async fn order_status(
            &self,
            inst_id: &str,
            cl_ord_id: &ClientOrderId,
        ) -> Result<Option<OrderUpdate>, ExchangeError> {
            self.inner.order_status(inst_id, cl_ord_id).await
        }
    }

    fn config() -> MarketMakerConfig {
        MarketMakerConfig {
            inst_id: "BTC-USDT".to_string(),
            num_orders_per_side: 2,
            single_order_size: dec!(0.01),
            requests_per_second: 1000,
            ..MarketMakerConfig::default()
        }
    }

    fn paper_venue(inst_id: &str) -> (Arc<PaperExchange>, FeedChannels) {
        let (senders, channels) = feed_channels(256);
        let mut settings = PaperSettings::new(inst_id);
        settings.seed = Some(1);
        settings.step_volatility = 0.0;
        (Arc::new(PaperExchange::new(settings, senders)), channels)
    }

    fn paper_engine(config: MarketMakerConfig) -> (Arc<PaperExchange>, Orchestrator<PaperExchange>, EngineHandle) {
        let (venue, channels) = paper_venue(&config.inst_id);
        let (engine, handle) = Orchestrator::new(config, venue.clone(), channels).unwrap();
        (venue, engine, handle)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (senders, channels) = feed_channels(4);
        let venue = Arc::new(PaperExchange::new(PaperSettings::new("BTC-USDT"), senders));
        let bad = MarketMakerConfig {
            num_orders_per_side: 0,
            ..config()
        };
        assert!(matches!(
            Orchestrator::new(bad, venue, channels),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_quotes_then_cancels_on_shutdown() {
        tokio::time::pause();
        let (venue, engine, handle) = paper_engine(config());
        let sim_token = CancellationToken::new();
        let sim = venue.clone().spawn_simulator(sim_token.clone());
        let run = tokio::spawn(engine.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), EngineState::Running);
        assert_eq!(venue.pending_orders("BTC-USDT").await.unwrap().len(), 4);

        handle.shutdown();
        run.await.unwrap().unwrap();
        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(venue.pending_orders("BTC-USDT").await.unwrap().is_empty());

        sim_token.cancel();
        sim.await.unwrap();
    }

    #[tokio::test]
    async fn test_never_quotes_on_missing_data() {
        tokio::time::pause();
        let (venue, engine, handle) = paper_engine(MarketMakerConfig {
            emergency_stop_after: 100,
            ..config()
        });
        let run = tokio::spawn(engine.run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(handle.state(), EngineState::Paused);
        assert!(venue.pending_orders("BTC-USDT").await.unwrap().is_empty());

        handle.shutdown();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_emergency_pause_waits_for_operator() {
        tokio::time::pause();
        let (venue, engine, handle) = paper_engine(MarketMakerConfig {
            emergency_stop_after: 2,
            emergency_action: EmergencyAction::Pause,
            ..config()
        });
        let sim_token = CancellationToken::new();
        let sim = venue.clone().spawn_simulator(sim_token.clone());
        let run = tokio::spawn(engine.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), EngineState::Running);
        assert_eq!(venue.pending_orders("BTC-USDT").await.unwrap().len(), 4);

        // Market data stops
        sim_token.cancel();
        sim.await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(handle.state(), EngineState::Paused);
        assert!(venue.pending_orders("BTC-USDT").await.unwrap().is_empty());

        // Fresh data alone does not resume quoting
        let sim_token = CancellationToken::new();
        let sim = venue.clone().spawn_simulator(sim_token.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), EngineState::Paused);
        assert!(venue.pending_orders("BTC-USDT").await.unwrap().is_empty());

        handle.resume();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), EngineState::Running);
        assert_eq!(venue.pending_orders("BTC-USDT").await.unwrap().len(), 4);

        handle.shutdown();
        run.await.unwrap().unwrap();
        assert!(venue.pending_orders("BTC-USDT").await.unwrap().is_empty());
        sim_token.cancel();
        sim.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_abandoned_engine_keeps_running() {
        let (paper, channels) = paper_venue("BTC-USDT");
        let venue = Arc::new(SlowVenue {
            inner: paper.clone(),
            slow: AtomicBool::new(true),
            place_calls: AtomicUsize::new(0),
        });
        let config = MarketMakerConfig {
            cycle_budget_sec: 2.0,
            ack_timeout_sec: 3.0,
            emergency_stop_after: 100,
            ..config()
        };
        let (engine, handle) = Orchestrator::new(config, venue.clone(), channels).unwrap();
        let sim_token = CancellationToken::new();
        let sim = paper.clone().spawn_simulator(sim_token.clone());
        let run = tokio::spawn(engine.run());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(venue.place_calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(handle.state(), EngineState::Running);
        assert!(paper.pending_orders("BTC-USDT").await.unwrap().is_empty());

        // Unanswered places are written off and quoted again
        venue.slow.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(handle.state(), EngineState::Running);
        assert_eq!(paper.pending_orders("BTC-USDT").await.unwrap().len(), 4);

        handle.shutdown();
        run.await.unwrap().unwrap();
        assert_eq!(handle.state(), EngineState::Stopped);
        sim_token.cancel();
        sim.await.unwrap();
    }
}
