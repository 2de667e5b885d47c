//! Order reconciliation.
//!
//! Drives the orders resting on the exchange towards the quotes the strategy
//! wants, with as few requests as possible.
//!
//! # Matching
//!
//! Per side, in this order:
//! 1. **Keep**: a desired quote within price and size tolerance of a tracked
//!    order needs no action. Busy orders (unconfirmed or with an action in
//!    flight) can be kept but are never touched.
//! 2. **Amend**: remaining quotes are paired with remaining amendable orders,
//!    both sorted tightest to mid first.
//! 3. **Place**: quotes left over, capped at `max_orders_per_side`.
//! 4. **Cancel**: orders left over, farthest from mid first.
//!
//! Actions execute as cancels, then amends, then places, in batches of at
//! most [`MAX_BATCH_SIZE`](crate::exchange::MAX_BATCH_SIZE).

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::id_gen::ClientOrderIdGenerator;
use super::tracker::{InFlightKind, InFlightTracker};
use super::types::{ClientOrderId, StrategyOrder};
use crate::config::{MarketMakerConfig, TradingMode};
use crate::context::{MarketContext, MarketSnapshot};
use crate::exchange::{
    AmendRequest, CancelRequest, ExchangeError, OrderAck, PlaceRequest, TradingApi, MAX_BATCH_SIZE,
};
use crate::logging::LogThrottle;
use crate::metrics;
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::strategy::{Quote, StrategyDecision};
use crate::types::OrderSide;

type DirectLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub inst_id: String,
    pub trade_mode: TradingMode,
    /// Price tolerance in ticks for keeping an order as-is
    pub price_tolerance_ticks: Decimal,
    /// Size tolerance as a fraction of the desired size
    pub size_tolerance_pct: Decimal,
    pub max_orders_per_side: usize,
    pub max_batch_size: usize,
    pub requests_per_second: u32,
    /// How long a request may stay unconfirmed before its status is re-queried
    pub ack_timeout: Duration,
    pub client_id_prefix: String,
    pub api_failure_threshold: u32,
    pub api_cooldown: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            inst_id: "BTC-USDT".to_string(),
            trade_mode: TradingMode::Cash,
            price_tolerance_ticks: Decimal::ONE,
            size_tolerance_pct: Decimal::ZERO,
            max_orders_per_side: 5,
            max_batch_size: MAX_BATCH_SIZE,
            requests_per_second: 10,
            ack_timeout: Duration::from_secs(5),
            client_id_prefix: "mm".to_string(),
            api_failure_threshold: 5,
            api_cooldown: Duration::from_secs(30),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_config(config: &MarketMakerConfig) -> Self {
        Self {
            inst_id: config.inst_id.clone(),
            trade_mode: config.trading_mode,
            price_tolerance_ticks: config.price_tolerance_ticks,
            size_tolerance_pct: config.size_tolerance_pct,
            max_orders_per_side: config.num_orders_per_side,
            max_batch_size: config.max_batch_size.clamp(1, MAX_BATCH_SIZE),
            requests_per_second: config.requests_per_second,
            ack_timeout: config.ack_timeout(),
            client_id_prefix: config.client_id_prefix.clone(),
            api_failure_threshold: config.api_failure_threshold,
            api_cooldown: config.api_cooldown(),
        }
    }
}

/// One change to the resting order set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    Place(Quote),
    Amend {
        cl_ord_id: ClientOrderId,
        side: OrderSide,
        new_price: Option<Decimal>,
        new_size: Option<Decimal>,
    },
    Cancel {
        cl_ord_id: ClientOrderId,
        side: OrderSide,
    },
}

impl OrderAction {
    pub fn side(&self) -> OrderSide {
        match self {
            Self::Place(quote) => quote.side,
            Self::Amend { side, .. } | Self::Cancel { side, .. } => *side,
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Place(q) => write!(f, "place {} {}@{}", q.side, q.size, q.price),
            Self::Amend {
                cl_ord_id,
                new_price,
                new_size,
                ..
            } => {
                write!(f, "amend {}", cl_ord_id)?;
                if let Some(p) = new_price {
                    write!(f, " px={}", p)?;
                }
                if let Some(s) = new_size {
                    write!(f, " sz={}", s)?;
                }
                Ok(())
            }
            Self::Cancel { cl_ord_id, .. } => write!(f, "cancel {}", cl_ord_id),
        }
    }
}

/// Outcome counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub placed: usize,
    pub amended: usize,
    pub canceled: usize,
    /// Refused by the exchange
    pub rejected: usize,
    /// Transport failures, outcome unknown or request lost
    pub failed: usize,
    /// Not sent: in-flight guard, open breaker or invalid request
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn total_sent(&self) -> usize {
        self.placed + self.amended + self.canceled + self.rejected + self.failed
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Desired-vs-actual order reconciler.
///
/// The reconciler is the only writer of orders in PENDING/SENT; everything
/// later arrives from the order feed or from its own acknowledgements.
pub struct OrderReconciler<A: TradingApi> {
    api: Arc<A>,
    ctx: Arc<MarketContext>,
    config: ReconcilerConfig,
    ids: ClientOrderIdGenerator,
    in_flight: InFlightTracker,
    limiter: DirectLimiter,
    breaker: CircuitBreaker,
    breaker_log: Mutex<LogThrottle>,
}

impl<A: TradingApi + 'static> OrderReconciler<A> {
    pub fn new(api: Arc<A>, ctx: Arc<MarketContext>, config: ReconcilerConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            ids: ClientOrderIdGenerator::new(config.client_id_prefix.clone()),
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            breaker: CircuitBreaker::new(
                "trading_api",
                config.api_failure_threshold,
                config.api_cooldown,
            ),
            breaker_log: Mutex::new(LogThrottle::new(Duration::from_secs(10))),
            in_flight: InFlightTracker::new(),
            api,
            ctx,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    fn is_busy(&self, order: &StrategyOrder) -> bool {
        !order.state.is_amendable() || self.in_flight.is_in_flight(&order.cl_ord_id)
    }

    fn size_matches(&self, actual: Decimal, desired: Decimal) -> bool {
        (actual - desired).abs() <= desired * self.config.size_tolerance_pct
    }

    fn matches(&self, order: &StrategyOrder, quote: &Quote, price_tolerance: Decimal) -> bool {
        (order.price - quote.price).abs() <= price_tolerance && self.size_matches(order.size, quote.size)
    }

    /// Computes the actions that turn the tracked orders into `decision`.
    /// Pure with respect to the exchange; nothing is sent.
    pub fn plan(&self, decision: &StrategyDecision, snapshot: &MarketSnapshot) -> Vec<OrderAction> {
        let tolerance = snapshot.tick_size() * self.config.price_tolerance_ticks;
        let mid = snapshot.mid_price();
        let forced: HashSet<&ClientOrderId> = decision.cancel.iter().collect();

        let mut cancels: Vec<(Decimal, OrderAction)> = Vec::new();
        let mut amends = Vec::new();
        let mut places = Vec::new();

        for side in [OrderSide::Buy, OrderSide::Sell] {
            let mut candidates: Vec<&StrategyOrder> = Vec::new();
            let mut active_on_side = 0usize;
            let mut canceled_on_side = 0usize;

            for order in snapshot.active_orders_on(side) {
                active_on_side += 1;
                let busy = self.is_busy(order);
                if !busy && (decision.cancel_all || forced.contains(&order.cl_ord_id)) {
                    canceled_on_side += 1;
                    cancels.push((distance(order.price, side, mid), cancel_action(order)));
                } else {
                    candidates.push(order);
                }
            }

            let mut desired: Vec<Quote> = if decision.cancel_all {
                Vec::new()
            } else {
                decision.quotes_on(side).copied().collect()
            };

            // 1. keep
            desired.retain(|quote| {
                match candidates.iter().position(|o| self.matches(o, quote, tolerance)) {
                    Some(idx) => {
                        candidates.swap_remove(idx);
                        false
                    }
                    None => true,
                }
            });

            // Unmatched busy orders are left alone this cycle
            let mut free: Vec<&StrategyOrder> = candidates.into_iter().filter(|o| !self.is_busy(o)).collect();
            free.sort_by_key(|o| distance(o.price, side, mid));
            desired.sort_by_key(|q| distance(q.price, side, mid));

            // 2. amend
            let mut unpaired_orders = Vec::new();
            let mut unpaired_quotes = Vec::new();
            let mut orders_iter = free.into_iter();
            let mut quotes_iter = desired.into_iter();
            loop {
                match (orders_iter.next(), quotes_iter.next()) {
                    (Some(order), Some(quote)) => {
                        if quote.size <= order.filled_size {
                            // Cannot shrink below what already traded
                            unpaired_orders.push(order);
                            unpaired_quotes.push(quote);
                            continue;
                        }
                        let new_price = ((order.price - quote.price).abs() > tolerance).then_some(quote.price);
                        let new_size = (!self.size_matches(order.size, quote.size)).then_some(quote.size);
                        if new_price.is_some() || new_size.is_some() {
                            amends.push(OrderAction::Amend {
                                cl_ord_id: order.cl_ord_id.clone(),
                                side,
                                new_price,
                                new_size,
                            });
                        }
                    }
                    (Some(order), None) => unpaired_orders.push(order),
                    (None, Some(quote)) => unpaired_quotes.push(quote),
                    (None, None) => break,
                }
            }

            // 4. cancel (before counting slots)
            for order in &unpaired_orders {
                canceled_on_side += 1;
                cancels.push((distance(order.price, side, mid), cancel_action(order)));
            }

            // 3. place, within the per-side cap
            let survivors = active_on_side - canceled_on_side;
            let slots = self.config.max_orders_per_side.saturating_sub(survivors);
            if unpaired_quotes.len() > slots {
                debug!(
                    side = %side,
                    wanted = unpaired_quotes.len(),
                    slots,
                    "Per-side order cap reached, dropping outer quotes"
                );
            }
            places.extend(unpaired_quotes.into_iter().take(slots).map(OrderAction::Place));
        }

        cancels.sort_by(|a, b| b.0.cmp(&a.0));
        cancels
            .into_iter()
            .map(|(_, action)| action)
            .chain(amends)
            .chain(places)
            .collect()
    }

    /// Plans and executes one reconciliation pass.
    pub async fn reconcile(&self, decision: &StrategyDecision, snapshot: &MarketSnapshot) -> ReconcileReport {
        let actions = self.plan(decision, snapshot);
        if actions.is_empty() {
            debug!("Orders already match desired quotes");
            return ReconcileReport::default();
        }
        self.execute(actions).await
    }

    /// Sends planned actions: cancels, then amends, then places.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub async fn execute(&self, actions: Vec<OrderAction>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut cancels = Vec::new();
        let mut amends = Vec::new();
        let mut places = Vec::new();
        for action in actions {
            match action {
                OrderAction::Cancel { cl_ord_id, side } => cancels.push((cl_ord_id, side)),
                OrderAction::Amend { .. } => amends.push(action),
                OrderAction::Place(quote) => places.push(quote),
            }
        }

        let mut claimed = Vec::with_capacity(cancels.len());
        for (id, side) in cancels {
            if self.in_flight.try_begin(&id, InFlightKind::Cancel) {
                claimed.push((id, side));
            } else {
                report.skipped += 1;
            }
        }
        let failed_cancels = self.send_cancels(claimed, &mut report).await;

        if !amends.is_empty() || !places.is_empty() {
            if self.breaker.is_open() {
                let suppressed = {
                    let mut throttle = self.breaker_log.lock().ok();
                    match throttle.as_mut() {
                        Some(t) => t.should_log().then(|| t.get_and_reset_suppressed_count()),
                        None => Some(0),
                    }
                };
                if let Some(suppressed) = suppressed {
                    warn!(
                        skipped = amends.len() + places.len(),
                        suppressed,
                        "Trading API circuit breaker open, holding amends and placements"
                    );
                }
                report.skipped += amends.len() + places.len();
            } else {
                self.send_amends(amends, &mut report).await;
                // A cancel that did not go through still occupies its slot
                for (side, failed) in failed_cancels {
                    let mut on_side: Vec<usize> = places
                        .iter()
                        .enumerate()
                        .filter(|(_, q)| q.side == side)
                        .map(|(i, _)| i)
                        .collect();
                    let drop = failed.min(on_side.len());
                    let keep = on_side.len() - drop;
                    for idx in on_side.drain(keep..).rev() {
                        places.remove(idx);
                        report.skipped += 1;
                    }
                }
                self.send_places(places, &mut report).await;
            }
        }

        if report.total_sent() > 0 {
            info!(
                placed = report.placed,
                amended = report.amended,
                canceled = report.canceled,
                rejected = report.rejected,
                failed = report.failed,
                skipped = report.skipped,
                "Reconciliation pass complete"
            );
        }
        report
    }

    /// Cancels every active order of the instrument, regardless of the
    /// breaker. Unconfirmed placements are pulled too.
    pub async fn cancel_all(&self, snapshot: &MarketSnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut claimed = Vec::new();
        for order in snapshot.active_orders() {
            if order.state == crate::orders::OrderState::Pending {
                continue;
            }
            if self.in_flight.escalate_to_cancel(&order.cl_ord_id) {
                claimed.push((order.cl_ord_id.clone(), order.side));
            } else {
                report.skipped += 1;
            }
        }
        if claimed.is_empty() {
            return report;
        }
        info!(orders = claimed.len(), "Canceling all orders");
        self.send_cancels(claimed, &mut report).await;
        report
    }

    /// Settles outstanding actions.
    ///
    /// Guards of orders that reached a terminal state (or vanished) are
    /// released. Requests unconfirmed past the ack timeout get one status
    /// lookup: a known order is updated from it, an unknown one is marked
    /// lost. Nothing is ever re-sent from here.
    pub async fn sweep_unconfirmed(&self, snapshot: &MarketSnapshot) -> usize {
        for id in self.in_flight.ids() {
            let settled = match snapshot.orders.get(&id) {
                None => true,
                Some(order) => {
                    order.state.is_terminal()
                        || (self.in_flight.get(&id).map(|f| f.kind) == Some(InFlightKind::AwaitingAck)
                            && order.state.rank() >= crate::orders::OrderState::Ack.rank())
                }
            };
            if settled {
                self.in_flight.finish(&id);
            }
        }

        let mut resolved = 0;
        for (id, flight) in self.in_flight.expired(self.config.ack_timeout) {
            self.limiter.until_ready().await;
            match self.api.order_status(&self.config.inst_id, &id).await {
                Ok(Some(update)) => {
                    debug!(cl_ord_id = %id, kind = %flight.kind, state = %update.state, "Unconfirmed order resolved by status lookup");
                    if let Err(e) = self.ctx.upsert_order(update).await {
                        debug!(cl_ord_id = %id, error = %e, "Status lookup older than tracked state");
                    }
                    self.in_flight.finish(&id);
                    resolved += 1;
                }
                Ok(None) => {
                    self.ctx.mark_lost(&id).await;
                    self.in_flight.finish(&id);
                    resolved += 1;
                }
                Err(e) => {
                    if !flight.requeried {
                        warn!(cl_ord_id = %id, kind = %flight.kind, error = %e, "Order status lookup failed, will retry");
                    }
                    self.in_flight.mark_requeried(&id);
                }
            }
        }
        resolved
    }

    /// Returns the number of cancels per side that did not reach the exchange.
    async fn send_cancels(
        &self,
        claimed: Vec<(ClientOrderId, OrderSide)>,
        report: &mut ReconcileReport,
    ) -> HashMap<OrderSide, usize> {
        let mut failed_by_side: HashMap<OrderSide, usize> = HashMap::new();
        let sides: HashMap<ClientOrderId, OrderSide> = claimed.iter().cloned().collect();
        let requests: Vec<CancelRequest> = claimed
            .into_iter()
            .map(|(cl_ord_id, _)| CancelRequest {
                cl_ord_id,
                inst_id: self.config.inst_id.clone(),
            })
            .collect();

        for chunk in requests.chunks(self.config.max_batch_size) {
            self.limiter.until_ready().await;
            let started = Instant::now();
            let result = self.api.cancel_orders(chunk).await;
            metrics::record_api_latency(started.elapsed().as_secs_f64());

            let outcomes = self.pair_acks(chunk.iter().map(|r| &r.cl_ord_id), result);
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(_) => {
                        // Guard stays until the feed confirms or the sweep resolves it
                        debug!(cl_ord_id = %id, "Cancel accepted");
                        metrics::record_order_action("cancel", "accepted");
                        report.canceled += 1;
                    }
                    Err(ExchangeError::Rejected { code, message }) => {
                        warn!(cl_ord_id = %id, code = %code, reason = %message, "Cancel rejected");
                        metrics::record_order_action("cancel", "rejected");
                        self.in_flight.finish(&id);
                        report.rejected += 1;
                        if let Some(side) = sides.get(&id) {
                            *failed_by_side.entry(*side).or_default() += 1;
                        }
                    }
                    Err(e) => {
                        warn!(cl_ord_id = %id, error = %e, "Cancel failed");
                        metrics::record_order_action("cancel", "failed");
                        self.in_flight.finish(&id);
                        report.failed += 1;
                        if let Some(side) = sides.get(&id) {
                            *failed_by_side.entry(*side).or_default() += 1;
                        }
                    }
                }
            }
        }
        failed_by_side
    }

    async fn send_amends(&self, amends: Vec<OrderAction>, report: &mut ReconcileReport) {
        let mut requests = Vec::with_capacity(amends.len());
        for action in amends {
            let OrderAction::Amend {
                cl_ord_id,
                new_price,
                new_size,
                ..
            } = action
            else {
                continue;
            };
            let request = AmendRequest {
                cl_ord_id,
                inst_id: self.config.inst_id.clone(),
                new_price,
                new_size,
            };
            if let Err(e) = request.validate() {
                error!(error = %e, "Refusing invalid amend");
                report.skipped += 1;
                continue;
            }
            if !self.in_flight.try_begin(&request.cl_ord_id, InFlightKind::Amend) {
                report.skipped += 1;
                continue;
            }
            requests.push(request);
        }

        for chunk in requests.chunks(self.config.max_batch_size) {
            self.limiter.until_ready().await;
            let started = Instant::now();
            let result = self.api.amend_orders(chunk).await;
            metrics::record_api_latency(started.elapsed().as_secs_f64());
            match &result {
                Ok(_) => self.breaker.record_success(),
                Err(e) if e.is_transient() => self.breaker.record_failure(),
                Err(_) => {}
            }

            let by_id: HashMap<&ClientOrderId, &AmendRequest> = chunk.iter().map(|r| (&r.cl_ord_id, r)).collect();
            for (id, outcome) in self.pair_acks(chunk.iter().map(|r| &r.cl_ord_id), result) {
                match outcome {
                    Ok(_) => {
                        if let Some(request) = by_id.get(&id) {
                            self.ctx.apply_amend(&id, request.new_price, request.new_size).await;
                        }
                        metrics::record_order_action("amend", "accepted");
                        report.amended += 1;
                    }
                    Err(ExchangeError::Rejected { code, message }) => {
                        warn!(cl_ord_id = %id, code = %code, reason = %message, "Amend rejected");
                        metrics::record_order_action("amend", "rejected");
                        report.rejected += 1;
                    }
                    Err(e) => {
                        warn!(cl_ord_id = %id, error = %e, "Amend failed");
                        metrics::record_order_action("amend", "failed");
                        report.failed += 1;
                    }
                }
                self.in_flight.finish(&id);
            }
        }
    }

    async fn send_places(&self, quotes: Vec<Quote>, report: &mut ReconcileReport) {
        let mut requests = Vec::with_capacity(quotes.len());
        for quote in quotes {
            let id = self.ids.next_id();
            let order = StrategyOrder::pending(id.clone(), quote.side, quote.price, quote.size);
            if let Err(e) = self.ctx.insert_pending(order).await {
                error!(error = %e, "Could not register new order");
                report.skipped += 1;
                continue;
            }
            if !self.in_flight.try_begin(&id, InFlightKind::AwaitingAck) {
                report.skipped += 1;
                continue;
            }
            if let Err(e) = self.ctx.mark_sent(&id).await {
                error!(cl_ord_id = %id, error = %e, "Could not mark order sent");
                self.in_flight.finish(&id);
                report.skipped += 1;
                continue;
            }
            requests.push(PlaceRequest {
                cl_ord_id: id,
                inst_id: self.config.inst_id.clone(),
                side: quote.side,
                price: quote.price,
                size: quote.size,
                trade_mode: self.config.trade_mode,
                post_only: true,
            });
        }

        for chunk in requests.chunks(self.config.max_batch_size) {
            self.limiter.until_ready().await;
            let started = Instant::now();
            let result = self.api.place_orders(chunk).await;
            metrics::record_api_latency(started.elapsed().as_secs_f64());

            match &result {
                Ok(_) => self.breaker.record_success(),
                Err(e) if e.is_transient() => self.breaker.record_failure(),
                Err(_) => {}
            }

            let mut ord_ids: HashMap<ClientOrderId, Option<String>> = HashMap::new();
            if let Ok(acks) = &result {
                for ack in acks {
                    ord_ids.insert(ack.cl_ord_id.clone(), ack.ord_id.clone());
                }
            }
            for (id, outcome) in self.pair_acks(chunk.iter().map(|r| &r.cl_ord_id), result) {
                match outcome {
                    Ok(_) => {
                        self.ctx.apply_ack(&id, ord_ids.remove(&id).flatten()).await;
                        self.in_flight.finish(&id);
                        metrics::record_order_action("place", "accepted");
                        report.placed += 1;
                    }
                    Err(ExchangeError::Rejected { code, message }) => {
                        self.ctx.mark_rejected(&id, &format!("{}: {}", code, message)).await;
                        self.in_flight.finish(&id);
                        metrics::record_order_action("place", "rejected");
                        report.rejected += 1;
                    }
                    Err(e) => {
                        // Outcome unknown: leave it SENT for the ack-timeout lookup
                        warn!(cl_ord_id = %id, error = %e, "Place outcome unknown");
                        metrics::record_order_action("place", "failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    /// Maps a batch result onto each request id. A whole-batch error applies
    /// to every entry; an entry missing from the response is a transport
    /// failure.
    fn pair_acks<'a>(
        &self,
        ids: impl Iterator<Item = &'a ClientOrderId>,
        result: Result<Vec<OrderAck>, ExchangeError>,
    ) -> Vec<(ClientOrderId, Result<(), ExchangeError>)> {
        match result {
            Ok(acks) => {
                let mut by_id: HashMap<ClientOrderId, Result<(), ExchangeError>> =
                    acks.into_iter().map(|ack| (ack.cl_ord_id, ack.result)).collect();
                ids.map(|id| {
                    let outcome = by_id.remove(id).unwrap_or_else(|| {
                        Err(ExchangeError::Transport("no result for order in batch response".to_string()))
                    });
                    (id.clone(), outcome)
                })
                .collect()
            }
            Err(e) => {
                error!(error = %e, "Batch request failed");
                ids.map(|id| (id.clone(), Err(e.clone()))).collect()
            }
        }
    }
}

fn cancel_action(order: &StrategyOrder) -> OrderAction {
    OrderAction::Cancel {
        cl_ord_id: order.cl_ord_id.clone(),
        side: order.side,
    }
}

/// Sort key for "how far from the touch". Without a mid, buys further down
/// and sells further up count as farther.
fn distance(price: Decimal, side: OrderSide, mid: Option<Decimal>) -> Decimal {
    match (mid, side) {
        (Some(mid), _) => (price - mid).abs(),
        (None, OrderSide::Buy) => -price,
        (None, OrderSide::Sell) => price,
    }
}
