//! Quoting strategies.
//!
//! Every strategy implements [`QuoteStrategy::compute_quotes`]: given a market
//! snapshot and the cycle's risk view it returns the full desired quote set
//! plus any orders that must be pulled. Strategies never talk to the exchange;
//! the reconciler turns decisions into actions.
//!
//! Selection is by configuration through [`StrategyKind`].

mod grid;
mod inventory_skew;
mod ladder;
mod volatility;

pub use grid::GridStrategy;
pub use inventory_skew::InventorySkewStrategy;
pub use ladder::{round_price, round_size};
pub use volatility::VolatilityStrategy;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::MarketMakerConfig;
use crate::context::MarketSnapshot;
use crate::orders::ClientOrderId;
use crate::risk::RiskSnapshot;
use crate::types::OrderSide;

/// One desired resting order. Produced fresh every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
}

impl Quote {
    pub fn new(side: OrderSide, price: Decimal, size: Decimal) -> Self {
        Self { side, price, size }
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyDecision {
    /// Desired working orders, tightest level first per side
    pub quotes: Vec<Quote>,
    /// Orders to pull regardless of matching
    pub cancel: Vec<ClientOrderId>,
    /// Pull every working order
    pub cancel_all: bool,
    pub halt_reason: Option<String>,
}

impl StrategyDecision {
    pub fn quotes(quotes: Vec<Quote>) -> Self {
        Self {
            quotes,
            ..Default::default()
        }
    }

    /// No quotes and cancel everything.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            quotes: Vec::new(),
            cancel: Vec::new(),
            cancel_all: true,
            halt_reason: Some(reason.into()),
        }
    }

    pub fn quotes_on(&self, side: OrderSide) -> impl Iterator<Item = &Quote> {
        self.quotes.iter().filter(move |q| q.side == side)
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty() && self.cancel.is_empty() && !self.cancel_all
    }
}

/// A quoting strategy.
///
/// Implementations are pure with respect to their inputs apart from their own
/// rolling buffers.
pub trait QuoteStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute_quotes(&mut self, snapshot: &MarketSnapshot, risk: &RiskSnapshot) -> StrategyDecision;
}

/// Configured strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    InventorySkew,
    Volatility,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "inventory_skew" | "inventory-skew" | "skew" => Ok(Self::InventorySkew),
            "volatility" | "vol" => Ok(Self::Volatility),
            _ => Err(format!(
                "Unknown strategy: '{}'. Use 'grid', 'inventory_skew' or 'volatility'",
                s
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grid => write!(f, "grid"),
            Self::InventorySkew => write!(f, "inventory_skew"),
            Self::Volatility => write!(f, "volatility"),
        }
    }
}

/// Parameters shared by the ladder-building strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteParams {
    pub step_pct: Decimal,
    pub levels: usize,
    pub order_size: Decimal,
    pub max_net_buy: Decimal,
    pub max_net_sell: Decimal,
}

impl QuoteParams {
    pub fn from_config(config: &MarketMakerConfig) -> Self {
        Self {
            step_pct: config.step_pct,
            levels: config.num_orders_per_side,
            order_size: config.order_size(),
            max_net_buy: config.max_net_buy,
            max_net_sell: config.max_net_sell,
        }
    }
}

/// Builds the configured strategy.
pub fn build_strategy(config: &MarketMakerConfig) -> Box<dyn QuoteStrategy> {
    let params = QuoteParams::from_config(config);
    match config.strategy_type {
        StrategyKind::Grid => Box::new(GridStrategy::new(params)),
        StrategyKind::InventorySkew => Box::new(
            InventorySkewStrategy::new(params, config.skew_factor, config.max_skew_pct)
                .with_level_reduction(config.inventory_level_reduction),
        ),
        StrategyKind::Volatility => Box::new(VolatilityStrategy::new(
            params,
            volatility::VolatilityParams::from_config(config),
        )),
    }
}
