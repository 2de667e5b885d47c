//! Market maker configuration.
//!
//! Every recognized option lives in [`MarketMakerConfig`]. The file is read
//! once at startup, CLI overrides are applied, and [`MarketMakerConfig::validate`]
//! runs before the engine is built. Nothing re-reads it at runtime.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::StrategyKind;

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// What to do after the emergency cancel-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyAction {
    /// Stop the engine
    Halt,
    /// Hold in PAUSED until an operator resumes
    Pause,
}

/// Margin mode sent with every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Cash,
    Cross,
    Isolated,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cash => write!(f, "cash"),
            Self::Cross => write!(f, "cross"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "cross" => Ok(Self::Cross),
            "isolated" => Ok(Self::Isolated),
            other => Err(format!("unknown trading mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMakerConfig {
    /// Instrument to quote (e.g. "BTC-USDT")
    #[serde(default = "default_inst_id")]
    pub inst_id: String,

    #[serde(default = "default_strategy_type")]
    pub strategy_type: StrategyKind,

    #[serde(default = "default_trading_mode")]
    pub trading_mode: TradingMode,

    // --- Quoting ---
    /// Distance between grid levels as a fraction of mid
    #[serde(default = "default_step_pct")]
    pub step_pct: Decimal,

    /// Levels per side, also the cap on working orders per side (1..=20)
    #[serde(default = "default_num_orders_per_side")]
    pub num_orders_per_side: usize,

    #[serde(default = "default_single_order_size")]
    pub single_order_size: Decimal,

    #[serde(default = "default_size_multiplier")]
    pub single_size_multiplier: Decimal,

    // --- Risk limits ---
    #[serde(default = "default_max_net")]
    pub max_net_buy: Decimal,

    #[serde(default = "default_max_net")]
    pub max_net_sell: Decimal,

    /// Maximum |net| x mark, in quote currency
    #[serde(default = "default_max_position_value")]
    pub max_position_value: Decimal,

    // --- Staleness ---
    #[serde(default = "default_orderbook_max_delay")]
    pub orderbook_max_delay_sec: f64,

    #[serde(default = "default_account_max_delay")]
    pub account_max_delay_sec: f64,

    #[serde(default)]
    pub monitor_orders_feed: bool,

    // --- Inventory skew ---
    #[serde(default = "default_skew_factor")]
    pub skew_factor: Decimal,

    #[serde(default = "default_max_skew_pct")]
    pub max_skew_pct: Decimal,

    /// Shrinks the level count on the side that would grow the position:
    /// `max(1, levels * (1 - factor * |net| / limit))`. Zero disables it.
    #[serde(default = "default_level_reduction")]
    pub inventory_level_reduction: Decimal,

    // --- Volatility ---
    #[serde(default = "default_volatility_lookback")]
    pub volatility_lookback: usize,

    #[serde(default = "default_volatility_multiplier")]
    pub volatility_multiplier: Decimal,

    #[serde(default = "default_min_spread_pct")]
    pub min_spread_pct: Decimal,

    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,

    /// Volatility circuit breaker ceiling; defaults to 3 x `max_spread_pct`
    #[serde(default)]
    pub volatility_ceiling_pct: Option<Decimal>,

    // --- Engine ---
    #[serde(default = "default_main_loop_interval")]
    pub main_loop_interval_sec: f64,

    /// Time budget of one strategy/reconcile cycle
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget_sec: f64,

    /// Consecutive unhealthy cycles before the emergency stop
    #[serde(default = "default_emergency_stop_after")]
    pub emergency_stop_after: u32,

    #[serde(default = "default_emergency_action")]
    pub emergency_action: EmergencyAction,

    // --- Reconciliation ---
    /// Price drift, in ticks, tolerated before an order is amended
    #[serde(default = "default_price_tolerance_ticks")]
    pub price_tolerance_ticks: Decimal,

    /// Relative size difference tolerated before an order is amended
    #[serde(default)]
    pub size_tolerance_pct: Decimal,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_sec: f64,

    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Consecutive failed trading API batches before placements are suspended
    #[serde(default = "default_api_failure_threshold")]
    pub api_failure_threshold: u32,

    #[serde(default = "default_api_cooldown")]
    pub api_cooldown_sec: f64,

    // --- Shutdown ---
    #[serde(default = "default_shutdown_cancel_retries")]
    pub shutdown_cancel_retries: u32,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_sec: f64,
}

// Default value functions for serde
fn default_inst_id() -> String {
    "BTC-USDT".to_string()
}
fn default_strategy_type() -> StrategyKind {
    StrategyKind::Grid
}
fn default_trading_mode() -> TradingMode {
    TradingMode::Cash
}
fn default_step_pct() -> Decimal {
    dec!(0.001)
}
fn default_num_orders_per_side() -> usize {
    5
}
fn default_single_order_size() -> Decimal {
    dec!(0.001)
}
fn default_size_multiplier() -> Decimal {
    dec!(1)
}
fn default_max_net() -> Decimal {
    dec!(100)
}
fn default_max_position_value() -> Decimal {
    dec!(10_000)
}
fn default_orderbook_max_delay() -> f64 {
    5.0
}
fn default_account_max_delay() -> f64 {
    10.0
}
fn default_skew_factor() -> Decimal {
    dec!(0.5)
}
fn default_max_skew_pct() -> Decimal {
    dec!(0.005)
}
fn default_level_reduction() -> Decimal {
    dec!(1.5)
}
fn default_volatility_lookback() -> usize {
    20
}
fn default_volatility_multiplier() -> Decimal {
    dec!(2)
}
fn default_min_spread_pct() -> Decimal {
    dec!(0.001)
}
fn default_max_spread_pct() -> Decimal {
    dec!(0.01)
}
fn default_main_loop_interval() -> f64 {
    1.0
}
fn default_cycle_budget() -> f64 {
    5.0
}
fn default_emergency_stop_after() -> u32 {
    5
}
fn default_emergency_action() -> EmergencyAction {
    EmergencyAction::Halt
}
fn default_price_tolerance_ticks() -> Decimal {
    dec!(1)
}
fn default_max_batch_size() -> usize {
    20
}
fn default_requests_per_second() -> u32 {
    10
}
fn default_ack_timeout() -> f64 {
    5.0
}
fn default_client_id_prefix() -> String {
    "mm".to_string()
}
fn default_api_failure_threshold() -> u32 {
    5
}
fn default_api_cooldown() -> f64 {
    30.0
}
fn default_shutdown_cancel_retries() -> u32 {
    3
}
fn default_shutdown_timeout() -> f64 {
    5.0
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            inst_id: default_inst_id(),
            strategy_type: default_strategy_type(),
            trading_mode: default_trading_mode(),
            step_pct: default_step_pct(),
            num_orders_per_side: default_num_orders_per_side(),
            single_order_size: default_single_order_size(),
            single_size_multiplier: default_size_multiplier(),
            max_net_buy: default_max_net(),
            max_net_sell: default_max_net(),
            max_position_value: default_max_position_value(),
            orderbook_max_delay_sec: default_orderbook_max_delay(),
            account_max_delay_sec: default_account_max_delay(),
            monitor_orders_feed: false,
            skew_factor: default_skew_factor(),
            max_skew_pct: default_max_skew_pct(),
            inventory_level_reduction: default_level_reduction(),
            volatility_lookback: default_volatility_lookback(),
            volatility_multiplier: default_volatility_multiplier(),
            min_spread_pct: default_min_spread_pct(),
            max_spread_pct: default_max_spread_pct(),
            volatility_ceiling_pct: None,
            main_loop_interval_sec: default_main_loop_interval(),
            cycle_budget_sec: default_cycle_budget(),
            emergency_stop_after: default_emergency_stop_after(),
            emergency_action: default_emergency_action(),
            price_tolerance_ticks: default_price_tolerance_ticks(),
            size_tolerance_pct: Decimal::ZERO,
            max_batch_size: default_max_batch_size(),
            requests_per_second: default_requests_per_second(),
            ack_timeout_sec: default_ack_timeout(),
            client_id_prefix: default_client_id_prefix(),
            api_failure_threshold: default_api_failure_threshold(),
            api_cooldown_sec: default_api_cooldown(),
            shutdown_cancel_retries: default_shutdown_cancel_retries(),
            shutdown_timeout_sec: default_shutdown_timeout(),
        }
    }
}

impl MarketMakerConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Size of a single quote.
    pub fn order_size(&self) -> Decimal {
        self.single_order_size * self.single_size_multiplier
    }

    pub fn volatility_ceiling(&self) -> Decimal {
        self.volatility_ceiling_pct
            .unwrap_or(self.max_spread_pct * dec!(3))
    }

    pub fn orderbook_max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.orderbook_max_delay_sec)
    }

    pub fn account_max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.account_max_delay_sec)
    }

    pub fn main_loop_interval(&self) -> Duration {
        Duration::from_secs_f64(self.main_loop_interval_sec)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_budget_sec)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_sec)
    }

    pub fn api_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.api_cooldown_sec)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_sec)
    }

    /// Validates every option once. Errors name the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inst_id.trim().is_empty() {
            return Err(invalid("inst_id", "cannot be empty"));
        }
        if self.step_pct <= Decimal::ZERO || self.step_pct >= Decimal::ONE {
            return Err(invalid("step_pct", format!("must be in (0, 1), got {}", self.step_pct)));
        }
        if !(1..=20).contains(&self.num_orders_per_side) {
            return Err(invalid(
                "num_orders_per_side",
                format!("must be between 1 and 20, got {}", self.num_orders_per_side),
            ));
        }
        if self.order_size() <= Decimal::ZERO {
            return Err(invalid("single_order_size", "order size must be positive"));
        }
        if self.max_net_buy < Decimal::ZERO {
            return Err(invalid("max_net_buy", "cannot be negative"));
        }
        if self.max_net_sell < Decimal::ZERO {
            return Err(invalid("max_net_sell", "cannot be negative"));
        }
        if self.max_position_value <= Decimal::ZERO {
            return Err(invalid("max_position_value", "must be positive"));
        }
        check_positive_secs("orderbook_max_delay_sec", self.orderbook_max_delay_sec)?;
        check_positive_secs("account_max_delay_sec", self.account_max_delay_sec)?;
        if self.skew_factor < Decimal::ZERO {
            return Err(invalid("skew_factor", "cannot be negative"));
        }
        if self.max_skew_pct < Decimal::ZERO || self.max_skew_pct >= Decimal::ONE {
            return Err(invalid("max_skew_pct", "must be in [0, 1)"));
        }
        if self.inventory_level_reduction < Decimal::ZERO {
            return Err(invalid("inventory_level_reduction", "cannot be negative"));
        }
        if self.volatility_lookback < 2 {
            return Err(invalid("volatility_lookback", "need at least 2 samples"));
        }
        if self.volatility_multiplier <= Decimal::ZERO {
            return Err(invalid("volatility_multiplier", "must be positive"));
        }
        if self.min_spread_pct <= Decimal::ZERO {
            return Err(invalid("min_spread_pct", "must be positive"));
        }
        if self.max_spread_pct < self.min_spread_pct || self.max_spread_pct >= Decimal::ONE {
            return Err(invalid(
                "max_spread_pct",
                format!(
                    "must be >= min_spread_pct ({}) and < 1, got {}",
                    self.min_spread_pct, self.max_spread_pct
                ),
            ));
        }
        if self.volatility_ceiling() <= Decimal::ZERO {
            return Err(invalid("volatility_ceiling_pct", "must be positive"));
        }
        check_positive_secs("main_loop_interval_sec", self.main_loop_interval_sec)?;
        check_positive_secs("cycle_budget_sec", self.cycle_budget_sec)?;
        if self.emergency_stop_after == 0 {
            return Err(invalid("emergency_stop_after", "must be at least 1"));
        }
        if self.price_tolerance_ticks < Decimal::ZERO {
            return Err(invalid("price_tolerance_ticks", "cannot be negative"));
        }
        if self.size_tolerance_pct < Decimal::ZERO || self.size_tolerance_pct >= Decimal::ONE {
            return Err(invalid("size_tolerance_pct", "must be in [0, 1)"));
        }
        if !(1..=20).contains(&self.max_batch_size) {
            return Err(invalid(
                "max_batch_size",
                format!("exchange accepts 1 to 20 entries per batch, got {}", self.max_batch_size),
            ));
        }
        if self.requests_per_second == 0 {
            return Err(invalid("requests_per_second", "must be at least 1"));
        }
        check_positive_secs("ack_timeout_sec", self.ack_timeout_sec)?;
        if self.client_id_prefix.is_empty()
            || !self.client_id_prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(invalid("client_id_prefix", "must be non-empty and alphanumeric"));
        }
        // 12 characters of session and counter follow; the exchange caps ids at 32
        if self.client_id_prefix.len() > 20 {
            return Err(invalid("client_id_prefix", "at most 20 characters"));
        }
        if self.api_failure_threshold == 0 {
            return Err(invalid("api_failure_threshold", "must be at least 1"));
        }
        check_positive_secs("api_cooldown_sec", self.api_cooldown_sec)?;
        if self.shutdown_cancel_retries == 0 {
            return Err(invalid("shutdown_cancel_retries", "must be at least 1"));
        }
        check_positive_secs("shutdown_timeout_sec", self.shutdown_timeout_sec)?;
        Ok(())
    }
}

fn check_positive_secs(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be a positive number of seconds, got {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MarketMakerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.volatility_ceiling(), dec!(0.03));
        assert_eq!(config.order_size(), dec!(0.001));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "inst_id": "ETH-USDT", "strategy_type": "inventory_skew", "num_orders_per_side": 3, "step_pct": "0.002" }}"#
        )
        .unwrap();

        let config = MarketMakerConfig::load(file.path()).unwrap();
        assert_eq!(config.inst_id, "ETH-USDT");
        assert_eq!(config.strategy_type, StrategyKind::InventorySkew);
        assert_eq!(config.num_orders_per_side, 3);
        assert_eq!(config.step_pct, dec!(0.002));
        assert_eq!(config.max_net_buy, dec!(100));
        assert_eq!(config.emergency_action, EmergencyAction::Halt);
    }

    #[test]
    fn test_out_of_range_levels_rejected() {
        let config = MarketMakerConfig {
            num_orders_per_side: 21,
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "num_orders_per_side"),
            other => panic!("expected invalid num_orders_per_side, got {:?}", other),
        }
    }

    #[test]
    fn test_spread_bounds_checked() {
        let config = MarketMakerConfig {
            min_spread_pct: dec!(0.02),
            max_spread_pct: dec!(0.01),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_spread_pct", .. })
        ));
    }

    #[test]
    fn test_batch_size_capped_at_exchange_limit() {
        let config = MarketMakerConfig {
            max_batch_size: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_id_prefix_rules() {
        for prefix in ["", "mm-1", "abcdefghijklmnopqrstu"] {
            let config = MarketMakerConfig {
                client_id_prefix: prefix.to_string(),
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid { field: "client_id_prefix", .. })
            ));
        }
    }

    #[test]
    fn test_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            MarketMakerConfig::load(file.path()),
            Err(ConfigError::Json(_))
        ));
    }
}
