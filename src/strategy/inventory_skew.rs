//! Grid quoting around an inventory-skewed mid.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::ladder::{build_ladder, grid_offsets, side_capacity};
use super::{QuoteParams, QuoteStrategy, StrategyDecision};
use crate::context::MarketSnapshot;
use crate::risk::RiskSnapshot;

/// Shifts the quoting center against the current inventory: long positions
/// pull quotes down so asks fill first, short positions push them up. The
/// side that would add to the position also quotes fewer levels.
#[derive(Debug, Clone)]
pub struct InventorySkewStrategy {
    params: QuoteParams,
    skew_factor: Decimal,
    max_skew_pct: Decimal,
    level_reduction: Decimal,
}

impl InventorySkewStrategy {
    pub fn new(params: QuoteParams, skew_factor: Decimal, max_skew_pct: Decimal) -> Self {
        Self {
            params,
            skew_factor,
            max_skew_pct,
            level_reduction: Decimal::ZERO,
        }
    }

    pub fn with_level_reduction(mut self, factor: Decimal) -> Self {
        self.level_reduction = factor.max(Decimal::ZERO);
        self
    }

    /// Levels allowed on the side that grows `|net|`; never below one.
    pub fn reduced_levels(&self, net_position: Decimal, limit: Decimal) -> usize {
        let levels = self.params.levels;
        if self.level_reduction.is_zero() || net_position.is_zero() || limit <= Decimal::ZERO {
            return levels;
        }
        let ratio = net_position.abs() / limit;
        let scaled = Decimal::from(levels) * (Decimal::ONE - self.level_reduction * ratio);
        scaled.trunc().to_usize().unwrap_or(0).clamp(1, levels.max(1))
    }

    /// Fractional shift of mid: `-skew_factor * net / max_position`, clamped
    /// to `+/- max_skew_pct`.
    pub fn skew(&self, net_position: Decimal) -> Decimal {
        let max_position = if net_position >= Decimal::ZERO {
            self.params.max_net_buy
        } else {
            self.params.max_net_sell
        };
        if max_position <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = -self.skew_factor * (net_position / max_position);
        raw.clamp(-self.max_skew_pct, self.max_skew_pct)
    }
}

impl QuoteStrategy for InventorySkewStrategy {
    fn name(&self) -> &'static str {
        "inventory_skew"
    }

    fn compute_quotes(&mut self, snapshot: &MarketSnapshot, risk: &RiskSnapshot) -> StrategyDecision {
        let Some(mid) = snapshot.mid_price() else {
            return StrategyDecision::default();
        };
        let center = mid * (Decimal::ONE + self.skew(risk.net_position));
        let offsets = grid_offsets(self.params.step_pct, self.params.levels);
        let mut capacity = side_capacity(&self.params, risk);
        let net = risk.net_position;
        if net > Decimal::ZERO {
            capacity.buy = capacity.buy.min(self.reduced_levels(net, self.params.max_net_buy));
        } else if net < Decimal::ZERO {
            capacity.sell = capacity.sell.min(self.reduced_levels(net, self.params.max_net_sell));
        }
        StrategyDecision::quotes(build_ladder(
            center,
            &offsets,
            self.params.order_size,
            capacity,
            &snapshot.instrument,
        ))
    }
}
