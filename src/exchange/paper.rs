//! In-memory paper venue.
//!
//! Implements [`TradingApi`] against a simulated single-instrument market and
//! publishes the five feeds through [`FeedSenders`], so the coordinator can run
//! end to end without a live transport. The mid follows a bounded random
//! walk; resting orders crossed by the simulated touch fill completely at
//! their own price.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    AmendRequest, CancelRequest, ExchangeError, OrderAck, PlaceRequest, TradingApi, MAX_BATCH_SIZE,
};
use crate::feeds::FeedSenders;
use crate::orders::{ClientOrderId, OrderState, OrderUpdate};
use crate::types::{
    AccountBalance, BookLevel, CurrencyBalance, Instrument, OrderBook, OrderSide, Position, PositionSide,
    Ticker,
};

#[derive(Debug, Clone)]
pub struct PaperSettings {
    pub instrument: Instrument,
    pub start_price: Decimal,
    /// Largest relative mid move per book tick
    pub step_volatility: f64,
    /// Half the simulated bid/ask spread, in ticks
    pub half_spread_ticks: u32,
    pub depth: usize,
    pub starting_cash: Decimal,
    pub book_interval: Duration,
    pub account_interval: Duration,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl PaperSettings {
    pub fn new(inst_id: impl Into<String>) -> Self {
        Self {
            instrument: Instrument::fallback(inst_id),
            start_price: dec!(50000),
            step_volatility: 0.0005,
            half_spread_ticks: 5,
            depth: 5,
            starting_cash: dec!(100000),
            book_interval: Duration::from_millis(200),
            account_interval: Duration::from_secs(1),
            seed: None,
        }
    }
}

struct PaperBook {
    mid: Decimal,
    orders: HashMap<ClientOrderId, OrderUpdate>,
    next_ord_id: u64,
    net_position: Decimal,
    entry_price: Decimal,
    cash: Decimal,
    rng: StdRng,
}

impl PaperBook {
    fn touch(&self, instrument: &Instrument, half_spread_ticks: u32) -> (Decimal, Decimal) {
        let half = instrument.tick_size * Decimal::from(half_spread_ticks.max(1));
        (self.mid - half, self.mid + half)
    }

    fn book_fill(&mut self, side: OrderSide, qty: Decimal, price: Decimal) {
        let signed = qty * side.sign();
        let next = self.net_position + signed;
        let long = self.net_position.is_sign_positive();
        if self.net_position.is_zero() || long == signed.is_sign_positive() {
            let held = self.net_position.abs();
            self.entry_price = (held * self.entry_price + qty * price) / (held + qty);
        } else if next.is_zero() {
            self.entry_price = Decimal::ZERO;
        } else if next.is_sign_positive() != long {
            self.entry_price = price;
        }
        self.net_position = next;
        self.cash -= signed * price;
    }

    /// Fills every active order the touch has crossed.
    fn match_orders(&mut self, best_bid: Decimal, best_ask: Decimal) -> Vec<OrderUpdate> {
        let crossed: Vec<ClientOrderId> = self
            .orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .filter(|o| match o.side {
                OrderSide::Buy => o.price >= best_ask,
                OrderSide::Sell => o.price <= best_bid,
            })
            .map(|o| o.cl_ord_id.clone())
            .collect();

        let mut fills = Vec::with_capacity(crossed.len());
        for id in crossed {
            let Some(order) = self.orders.get_mut(&id) else {
                continue;
            };
            let qty = order.size - order.filled_size;
            let (side, price) = (order.side, order.price);
            order.filled_size = order.size;
            order.avg_fill_price = Some(price);
            order.state = OrderState::Filled;
            let update = order.clone();
            self.book_fill(side, qty, price);
            fills.push(update);
        }
        fills
    }
}

/// Simulated exchange for one instrument.
pub struct PaperExchange {
    settings: PaperSettings,
    book: Mutex<PaperBook>,
    feeds: FeedSenders,
}

impl PaperExchange {
    pub fn new(settings: PaperSettings, feeds: FeedSenders) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            book: Mutex::new(PaperBook {
                mid: settings.start_price,
                orders: HashMap::new(),
                next_ord_id: 1,
                net_position: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                cash: settings.starting_cash,
                rng,
            }),
            settings,
            feeds,
        }
    }

    fn quote_currency(&self) -> &str {
        self.settings
            .instrument
            .inst_id
            .split('-')
            .nth(1)
            .unwrap_or("USDT")
    }

    fn check_batch(&self, len: usize) -> Result<(), ExchangeError> {
        if len > MAX_BATCH_SIZE {
            return Err(ExchangeError::InvalidRequest(format!(
                "batch of {} exceeds the {} entry limit",
                len, MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }

    async fn publish_orders(&self, updates: Vec<OrderUpdate>) {
        for update in updates {
            if self.feeds.orders.send(update).await.is_err() {
                debug!("Order feed receiver gone");
                return;
            }
        }
    }

    pub async fn mid(&self) -> Decimal {
        self.book.lock().await.mid
    }

    /// Moves the simulated mid, matches resting orders and publishes the new
    /// book and ticker.
    pub async fn move_mid(&self, mid: Decimal) {
        let tick = self.settings.instrument.tick_size;
        let (book, ticker, fills) = {
            let mut state = self.book.lock().await;
            state.mid = (mid / tick).round() * tick;
            let (bid, ask) = state.touch(&self.settings.instrument, self.settings.half_spread_ticks);
            let fills = state.match_orders(bid, ask);
            (self.build_book(bid, ask), self.build_ticker(state.mid, bid, ask), fills)
        };
        for fill in &fills {
            info!(cl_ord_id = %fill.cl_ord_id, side = %fill.side, price = %fill.price, size = %fill.size, "Paper fill");
        }
        self.publish_orders(fills).await;
        let _ = self.feeds.orderbook.send(book).await;
        let _ = self.feeds.ticker.send(ticker).await;
    }

    /// One random-walk step.
    pub async fn step_market(&self) {
        let next = {
            let mut state = self.book.lock().await;
            let vol = self.settings.step_volatility.abs();
            let shock = if vol > 0.0 {
                state.rng.random_range(-vol..vol)
            } else {
                0.0
            };
            let factor = Decimal::ONE + Decimal::from_f64(shock).unwrap_or_default();
            (state.mid * factor).max(self.settings.instrument.tick_size)
        };
        self.move_mid(next).await;
    }

    /// Publishes the account balance and the net position.
    pub async fn publish_account(&self) {
        let (balance, positions) = {
            let state = self.book.lock().await;
            let equity = state.cash + state.net_position * state.mid;
            let balance = AccountBalance {
                total_equity: equity,
                currencies: vec![CurrencyBalance {
                    currency: self.quote_currency().to_string(),
                    available: state.cash,
                    frozen: Decimal::ZERO,
                }],
                timestamp: Utc::now(),
            };
            let positions = vec![Position {
                inst_id: self.settings.instrument.inst_id.clone(),
                side: PositionSide::Net,
                size: state.net_position,
                entry_price: state.entry_price,
            }];
            (balance, positions)
        };
        let _ = self.feeds.account.send(balance).await;
        let _ = self.feeds.positions.send(positions).await;
    }

    fn build_book(&self, bid: Decimal, ask: Decimal) -> OrderBook {
        let tick = self.settings.instrument.tick_size;
        let levels = self.settings.depth.max(1);
        let size = self.settings.instrument.min_size.max(dec!(0.01)) * dec!(10);
        let bids = (0..levels)
            .map(|i| BookLevel::new(bid - tick * Decimal::from(i), size))
            .collect();
        let asks = (0..levels)
            .map(|i| BookLevel::new(ask + tick * Decimal::from(i), size))
            .collect();
        OrderBook::new(self.settings.instrument.inst_id.clone(), bids, asks)
    }

    fn build_ticker(&self, mid: Decimal, bid: Decimal, ask: Decimal) -> Ticker {
        Ticker {
            inst_id: self.settings.instrument.inst_id.clone(),
            last: mid,
            mark: Some(mid),
            bid: Some(bid),
            ask: Some(ask),
            timestamp: Utc::now(),
        }
    }

    /// Runs the market generator until `token` is cancelled.
    pub fn spawn_simulator(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut book_tick = tokio::time::interval(self.settings.book_interval);
            let mut account_tick = tokio::time::interval(self.settings.account_interval);
            book_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            account_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(inst_id = %self.settings.instrument.inst_id, "Paper market simulator started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = book_tick.tick() => self.step_market().await,
                    _ = account_tick.tick() => self.publish_account().await,
                }
            }
            info!("Paper market simulator stopped");
        })
    }
}

#[async_trait]
impl TradingApi for PaperExchange {
    async fn instrument(&self, inst_id: &str) -> Result<Instrument, ExchangeError> {
        if inst_id != self.settings.instrument.inst_id {
            return Err(ExchangeError::InvalidRequest(format!("unknown instrument {}", inst_id)));
        }
        Ok(self.settings.instrument.clone())
    }

    async fn pending_orders(&self, inst_id: &str) -> Result<Vec<OrderUpdate>, ExchangeError> {
        if inst_id != self.settings.instrument.inst_id {
            return Ok(Vec::new());
        }
        let state = self.book.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn place_orders(&self, orders: &[PlaceRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        self.check_batch(orders.len())?;
        let mut acks = Vec::with_capacity(orders.len());
        let mut published = Vec::new();
        {
            let mut state = self.book.lock().await;
            let (bid, ask) = state.touch(&self.settings.instrument, self.settings.half_spread_ticks);
            for req in orders {
                if let Some(existing) = state.orders.get(&req.cl_ord_id) {
                    acks.push(OrderAck::accepted(req.cl_ord_id.clone(), existing.ord_id.clone()));
                    continue;
                }
                if req.price <= Decimal::ZERO || req.size < self.settings.instrument.min_size {
                    acks.push(OrderAck::rejected(req.cl_ord_id.clone(), "51000", "invalid price or size"));
                    continue;
                }
                let crosses = match req.side {
                    OrderSide::Buy => req.price >= ask,
                    OrderSide::Sell => req.price <= bid,
                };
                if req.post_only && crosses {
                    acks.push(OrderAck::rejected(
                        req.cl_ord_id.clone(),
                        "51019",
                        "post-only order would take liquidity",
                    ));
                    continue;
                }

                let ord_id = state.next_ord_id.to_string();
                state.next_ord_id += 1;
                let update = OrderUpdate {
                    cl_ord_id: req.cl_ord_id.clone(),
                    ord_id: Some(ord_id.clone()),
                    side: req.side,
                    price: req.price,
                    size: req.size,
                    filled_size: Decimal::ZERO,
                    avg_fill_price: None,
                    state: OrderState::Live,
                };
                state.orders.insert(req.cl_ord_id.clone(), update.clone());
                published.push(update);
                acks.push(OrderAck::accepted(req.cl_ord_id.clone(), Some(ord_id)));
            }
        }
        self.publish_orders(published).await;
        Ok(acks)
    }

    async fn amend_orders(&self, amends: &[AmendRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        self.check_batch(amends.len())?;
        let mut acks = Vec::with_capacity(amends.len());
        let mut published = Vec::new();
        {
            let mut state = self.book.lock().await;
            for req in amends {
                if let Err(e) = req.validate() {
                    acks.push(OrderAck {
                        cl_ord_id: req.cl_ord_id.clone(),
                        ord_id: None,
                        result: Err(e),
                    });
                    continue;
                }
                let Some(order) = state.orders.get_mut(&req.cl_ord_id).filter(|o| !o.state.is_terminal()) else {
                    acks.push(OrderAck::rejected(req.cl_ord_id.clone(), "51503", "order does not exist"));
                    continue;
                };
                if matches!(req.new_size, Some(s) if s <= order.filled_size) {
                    acks.push(OrderAck::rejected(
                        req.cl_ord_id.clone(),
                        "51512",
                        "new size below filled size",
                    ));
                    continue;
                }
                if let Some(price) = req.new_price {
                    order.price = price;
                }
                if let Some(size) = req.new_size {
                    order.size = size;
                }
                published.push(order.clone());
                acks.push(OrderAck::accepted(req.cl_ord_id.clone(), order.ord_id.clone()));
            }
        }
        self.publish_orders(published).await;
        Ok(acks)
    }

    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError> {
        self.check_batch(cancels.len())?;
        let mut acks = Vec::with_capacity(cancels.len());
        let mut published = Vec::new();
        {
            let mut state = self.book.lock().await;
            for req in cancels {
                match state.orders.get_mut(&req.cl_ord_id) {
                    Some(order) if !order.state.is_terminal() => {
                        order.state = OrderState::Canceled;
                        published.push(order.clone());
                        acks.push(OrderAck::accepted(req.cl_ord_id.clone(), order.ord_id.clone()));
                    }
                    _ => acks.push(OrderAck::rejected(
                        req.cl_ord_id.clone(),
                        "51400",
                        "order already closed or does not exist",
                    )),
                }
            }
        }
        self.publish_orders(published).await;
        Ok(acks)
    }

    async fn order_status(
        &self,
        _inst_id: &str,
        cl_ord_id: &ClientOrderId,
    ) -> Result<Option<OrderUpdate>, ExchangeError> {
        Ok(self.book.lock().await.orders.get(cl_ord_id).cloned())
    }
}
