//! Immutable read view of the market context.

use std::collections::HashMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio::time::Instant;

use super::fills::FillLedger;
use super::{FeedClock, FeedKind};
use crate::orders::{ClientOrderId, StrategyOrder};
use crate::types::{AccountBalance, Instrument, OrderBook, OrderSide, Position, Ticker};

/// Point-in-time copy of everything the strategy loop reads.
///
/// Taken under a single read guard, so no field is torn relative to another.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub inst_id: String,
    pub orderbook: Option<OrderBook>,
    pub ticker: Option<Ticker>,
    pub instrument: Instrument,
    pub balance: Option<AccountBalance>,
    pub positions: Vec<Position>,
    pub orders: HashMap<ClientOrderId, StrategyOrder>,
    pub feeds: FeedClock,
    pub recent_mids: Vec<Decimal>,
    pub fills: FillLedger,
    pub taken_at: Instant,
}

impl MarketSnapshot {
    /// Empty view for an instrument, with fallback trading rules.
    pub fn empty(inst_id: impl Into<String>) -> Self {
        let inst_id = inst_id.into();
        Self {
            instrument: Instrument::fallback(inst_id.clone()),
            inst_id,
            orderbook: None,
            ticker: None,
            balance: None,
            positions: Vec::new(),
            orders: HashMap::new(),
            feeds: FeedClock::default(),
            recent_mids: Vec::new(),
            fills: FillLedger::default(),
            taken_at: Instant::now(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.best_bid())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.best_ask())
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.mid_price())
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.orderbook.as_ref().and_then(|b| b.spread())
    }

    pub fn tick_size(&self) -> Decimal {
        self.instrument.tick_size
    }

    /// Mark price: ticker mark, else ticker last, else mid.
    pub fn mark_price(&self) -> Option<Decimal> {
        self.ticker
            .as_ref()
            .and_then(|t| t.mark.or(Some(t.last)))
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| self.mid_price())
    }

    /// Signed sum of position sizes for this instrument.
    pub fn net_position(&self) -> Decimal {
        self.instrument_positions().map(Position::signed_size).sum()
    }

    pub fn instrument_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(move |p| p.inst_id == self.inst_id)
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &StrategyOrder> {
        self.orders.values().filter(|o| o.is_active())
    }

    pub fn active_orders_on(&self, side: OrderSide) -> impl Iterator<Item = &StrategyOrder> {
        self.active_orders().filter(move |o| o.side == side)
    }

    pub fn active_count(&self, side: OrderSide) -> usize {
        self.active_orders_on(side).count()
    }

    pub fn last_update(&self, feed: FeedKind) -> Option<Instant> {
        self.feeds.last_update(feed)
    }

    /// Sample standard deviation of simple returns over the last
    /// `lookback + 1` mid prices.
    pub fn volatility(&self, lookback: usize) -> Option<Decimal> {
        if lookback == 0 || self.recent_mids.len() < 2 {
            return None;
        }
        let start = self.recent_mids.len().saturating_sub(lookback + 1);
        let prices: Vec<f64> = self.recent_mids[start..]
            .iter()
            .filter_map(|p| p.to_f64())
            .collect();

        let returns: Vec<f64> = prices
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Decimal::from_f64(variance.sqrt())
    }
}
