//! Fixed-step symmetric grid around mid.

use super::ladder::{build_ladder, grid_offsets, side_capacity};
use super::{QuoteParams, QuoteStrategy, StrategyDecision};
use crate::context::MarketSnapshot;
use crate::risk::RiskSnapshot;

/// Places `levels` orders per side at `mid * (1 -/+ step_pct * k)`.
///
/// A side whose next level would push the net position past its limit is
/// truncated; a side already in breach is not quoted at all.
#[derive(Debug, Clone)]
pub struct GridStrategy {
    params: QuoteParams,
}

impl GridStrategy {
    pub fn new(params: QuoteParams) -> Self {
        Self { params }
    }
}

impl QuoteStrategy for GridStrategy {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn compute_quotes(&mut self, snapshot: &MarketSnapshot, risk: &RiskSnapshot) -> StrategyDecision {
        let Some(mid) = snapshot.mid_price() else {
            return StrategyDecision::default();
        };
        let offsets = grid_offsets(self.params.step_pct, self.params.levels);
        let capacity = side_capacity(&self.params, risk);
        StrategyDecision::quotes(build_ladder(
            mid,
            &offsets,
            self.params.order_size,
            capacity,
            &snapshot.instrument,
        ))
    }
}
