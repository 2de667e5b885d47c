//! Risk Calculator
//!
//! Point-in-time risk view computed from a market snapshot.
//!
//! # Architecture
//!
//! - Pure function of the snapshot and the configured limits
//! - Breaches are reported as flags, never acted upon here
//! - The strategy decides how to reduce exposure
//!
//! # Example
//!
//! ```ignore
//! use quoteforge::risk::{RiskCalculator, RiskLimits, RiskFlag};
//!
//! let calculator = RiskCalculator::new(RiskLimits::default());
//! let risk = calculator.compute(&snapshot);
//! if risk.is_breached(RiskFlag::MaxNetBuy) {
//!     // stop quoting bids
//! }
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::MarketMakerConfig;
use crate::context::MarketSnapshot;
use crate::types::OrderSide;

/// Configured position limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskLimits {
    pub max_net_buy: Decimal,
    pub max_net_sell: Decimal,
    pub max_position_value: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_net_buy: dec!(100),
            max_net_sell: dec!(100),
            max_position_value: dec!(10_000),
        }
    }
}

impl RiskLimits {
    pub fn from_config(config: &MarketMakerConfig) -> Self {
        Self {
            max_net_buy: config.max_net_buy,
            max_net_sell: config.max_net_sell,
            max_position_value: config.max_position_value,
        }
    }
}

/// A breached limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskFlag {
    /// Net long above `max_net_buy`
    MaxNetBuy,
    /// Net short beyond `max_net_sell`
    MaxNetSell,
    /// Exposure above `max_position_value`
    MaxPositionValue,
}

impl std::fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskFlag::MaxNetBuy => write!(f, "max_net_buy"),
            RiskFlag::MaxNetSell => write!(f, "max_net_sell"),
            RiskFlag::MaxPositionValue => write!(f, "max_position_value"),
        }
    }
}

/// Risk figures for one cycle. Recomputed every cycle, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSnapshot {
    pub net_position: Decimal,
    pub mark_price: Option<Decimal>,
    /// |net| x mark
    pub exposure: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    /// Notional of resting buy orders
    pub buy_order_exposure: Decimal,
    /// Notional of resting sell orders
    pub sell_order_exposure: Decimal,
    /// exposure / max_position_value, in percent
    pub position_used_pct: Decimal,
    pub breaches: Vec<RiskFlag>,
}

impl RiskSnapshot {
    /// A flat book with no breaches.
    pub fn flat() -> Self {
        Self {
            net_position: Decimal::ZERO,
            mark_price: None,
            exposure: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            buy_order_exposure: Decimal::ZERO,
            sell_order_exposure: Decimal::ZERO,
            position_used_pct: Decimal::ZERO,
            breaches: Vec::new(),
        }
    }

    pub fn is_breached(&self, flag: RiskFlag) -> bool {
        self.breaches.contains(&flag)
    }

    pub fn any_breach(&self) -> bool {
        !self.breaches.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RiskCalculator {
    limits: RiskLimits,
}

impl RiskCalculator {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn compute(&self, snapshot: &MarketSnapshot) -> RiskSnapshot {
        let net_position = snapshot.net_position();
        let mark_price = snapshot.mark_price();
        let mark = mark_price.unwrap_or(Decimal::ZERO);

        let exposure = net_position.abs() * mark;
        let unrealized_pnl = match mark_price {
            Some(mark) => snapshot
                .instrument_positions()
                .map(|p| (mark - p.entry_price) * p.signed_size())
                .sum(),
            None => Decimal::ZERO,
        };

        let order_exposure = |side: OrderSide| -> Decimal {
            snapshot
                .active_orders_on(side)
                .map(|o| o.remaining_size() * o.price)
                .sum()
        };

        let position_used_pct = if self.limits.max_position_value > Decimal::ZERO {
            exposure / self.limits.max_position_value * dec!(100)
        } else {
            Decimal::ZERO
        };

        let mut breaches = Vec::new();
        if net_position > self.limits.max_net_buy {
            breaches.push(RiskFlag::MaxNetBuy);
        }
        if net_position < -self.limits.max_net_sell {
            breaches.push(RiskFlag::MaxNetSell);
        }
        if exposure > self.limits.max_position_value {
            breaches.push(RiskFlag::MaxPositionValue);
        }

        RiskSnapshot {
            net_position,
            mark_price,
            exposure,
            unrealized_pnl,
            realized_pnl: snapshot.fills.realized_pnl,
            buy_order_exposure: order_exposure(OrderSide::Buy),
            sell_order_exposure: order_exposure(OrderSide::Sell),
            position_used_pct,
            breaches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderState, StrategyOrder};
    use crate::types::{BookLevel, OrderBook, Position, PositionSide};

    fn snapshot(mid_bid: Decimal, mid_ask: Decimal, positions: Vec<Position>) -> MarketSnapshot {
        let mut snap = MarketSnapshot::empty("BTC-USDT");
        snap.orderbook = Some(OrderBook::new(
            "BTC-USDT",
            vec![BookLevel::new(mid_bid, dec!(1))],
            vec![BookLevel::new(mid_ask, dec!(1))],
        ));
        snap.positions = positions;
        snap
    }

    fn long(size: Decimal, entry: Decimal) -> Position {
        Position {
            inst_id: "BTC-USDT".into(),
            side: PositionSide::Long,
            size,
            entry_price: entry,
        }
    }

    #[test]
    fn test_exposure_and_pnl() {
        let snap = snapshot(dec!(109), dec!(111), vec![long(dec!(2), dec!(100))]);
        let risk = RiskCalculator::new(RiskLimits::default()).compute(&snap);

        assert_eq!(risk.net_position, dec!(2));
        assert_eq!(risk.mark_price, Some(dec!(110)));
        assert_eq!(risk.exposure, dec!(220));
        assert_eq!(risk.unrealized_pnl, dec!(20));
        assert_eq!(risk.position_used_pct, dec!(2.2));
        assert!(!risk.any_breach());
    }

    #[test]
    fn test_short_pnl_sign() {
        let short = Position {
            inst_id: "BTC-USDT".into(),
            side: PositionSide::Short,
            size: dec!(1),
            entry_price: dec!(100),
        };
        let snap = snapshot(dec!(89), dec!(91), vec![short]);
        let risk = RiskCalculator::new(RiskLimits::default()).compute(&snap);
        assert_eq!(risk.unrealized_pnl, dec!(10));
    }

    #[test]
    fn test_net_buy_breach() {
        let snap = snapshot(dec!(99), dec!(101), vec![long(dec!(12), dec!(100))]);
        let limits = RiskLimits {
            max_net_buy: dec!(10),
            ..Default::default()
        };
        let risk = RiskCalculator::new(limits).compute(&snap);
        assert_eq!(risk.breaches, vec![RiskFlag::MaxNetBuy]);
    }

    #[test]
    fn test_value_breach() {
        let snap = snapshot(dec!(999), dec!(1001), vec![long(dec!(11), dec!(1000))]);
        let risk = RiskCalculator::new(RiskLimits::default()).compute(&snap);
        assert!(risk.is_breached(RiskFlag::MaxPositionValue));
        assert!(!risk.is_breached(RiskFlag::MaxNetBuy));
    }

    #[test]
    fn test_order_exposure_uses_remaining_size() {
        let mut snap = snapshot(dec!(99), dec!(101), vec![]);
        let mut bid = StrategyOrder::pending("mm1".into(), OrderSide::Buy, dec!(99), dec!(2));
        bid.state = OrderState::Live;
        bid.filled_size = dec!(0.5);
        let mut done = StrategyOrder::pending("mm2".into(), OrderSide::Sell, dec!(101), dec!(1));
        done.state = OrderState::Filled;
        snap.orders.insert(bid.cl_ord_id.clone(), bid);
        snap.orders.insert(done.cl_ord_id.clone(), done);

        let risk = RiskCalculator::new(RiskLimits::default()).compute(&snap);
        assert_eq!(risk.buy_order_exposure, dec!(148.5));
        assert_eq!(risk.sell_order_exposure, dec!(0));
    }

    #[test]
    fn test_no_mark_no_exposure() {
        let mut snap = MarketSnapshot::empty("BTC-USDT");
        snap.positions = vec![long(dec!(1), dec!(100))];
        let risk = RiskCalculator::new(RiskLimits::default()).compute(&snap);
        assert_eq!(risk.exposure, dec!(0));
        assert_eq!(risk.unrealized_pnl, dec!(0));
    }
}
