//! Volatility-adaptive spread with a circuit breaker.

use std::collections::VecDeque;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::ladder::{build_ladder, side_capacity};
use super::{QuoteParams, QuoteStrategy, StrategyDecision};
use crate::config::MarketMakerConfig;
use crate::context::MarketSnapshot;
use crate::risk::RiskSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatilityParams {
    /// Rolling window length, in cycles
    pub lookback: usize,
    pub multiplier: Decimal,
    pub min_spread_pct: Decimal,
    pub max_spread_pct: Decimal,
    /// Relative volatility above which quoting stops
    pub ceiling_pct: Decimal,
}

impl VolatilityParams {
    pub fn from_config(config: &MarketMakerConfig) -> Self {
        Self {
            lookback: config.volatility_lookback,
            multiplier: config.volatility_multiplier,
            min_spread_pct: config.min_spread_pct,
            max_spread_pct: config.max_spread_pct,
            ceiling_pct: config.volatility_ceiling(),
        }
    }
}

/// Widens the quoted spread with recent mid-price dispersion.
///
/// `spread = clamp(multiplier * stdev(window) / mid, min, max)`; the first
/// level on each side sits at `mid -/+ spread / 2` and further levels step
/// outward by `step_pct`. When volatility exceeds the ceiling the decision is
/// empty with cancel-all until it subsides.
#[derive(Debug, Clone)]
pub struct VolatilityStrategy {
    params: QuoteParams,
    vol: VolatilityParams,
    window: VecDeque<Decimal>,
    tripped: bool,
}

impl VolatilityStrategy {
    pub fn new(params: QuoteParams, vol: VolatilityParams) -> Self {
        Self {
            window: VecDeque::with_capacity(vol.lookback),
            params,
            vol,
            tripped: false,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    fn push(&mut self, mid: Decimal) {
        if self.window.len() == self.vol.lookback {
            self.window.pop_front();
        }
        self.window.push_back(mid);
    }

    /// Sample standard deviation of the window relative to `mid`.
    fn relative_volatility(&self, mid: Decimal) -> Option<Decimal> {
        if self.window.len() < 2 || mid <= Decimal::ZERO {
            return None;
        }
        let samples: Vec<f64> = self.window.iter().filter_map(|p| p.to_f64()).collect();
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let stdev = Decimal::from_f64(variance.sqrt())?;
        Some(stdev / mid)
    }

    pub fn spread(&self, volatility: Option<Decimal>) -> Decimal {
        match volatility {
            Some(v) => (self.vol.multiplier * v).clamp(self.vol.min_spread_pct, self.vol.max_spread_pct),
            None => self.vol.min_spread_pct,
        }
    }
}

impl QuoteStrategy for VolatilityStrategy {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn compute_quotes(&mut self, snapshot: &MarketSnapshot, risk: &RiskSnapshot) -> StrategyDecision {
        let Some(mid) = snapshot.mid_price() else {
            return StrategyDecision::default();
        };
        self.push(mid);
        let volatility = self.relative_volatility(mid);

        if let Some(v) = volatility.filter(|v| *v > self.vol.ceiling_pct) {
            if !self.tripped {
                warn!(
                    volatility = %v.round_dp(6),
                    ceiling = %self.vol.ceiling_pct,
                    "Volatility circuit breaker tripped, pulling all quotes"
                );
            }
            self.tripped = true;
            return StrategyDecision::halt(format!(
                "volatility {} above ceiling {}",
                v.round_dp(6),
                self.vol.ceiling_pct
            ));
        }
        if self.tripped {
            info!("Volatility back under ceiling, resuming quoting");
            self.tripped = false;
        }

        let spread = self.spread(volatility);
        let offsets: Vec<Decimal> = (0..self.params.levels)
            .map(|k| spread / dec!(2) + self.params.step_pct * Decimal::from(k))
            .collect();
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
