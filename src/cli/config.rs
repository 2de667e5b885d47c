//! CLI configuration bridging command-line arguments to [`MarketMakerConfig`].

use std::path::PathBuf;

use crate::config::{ConfigError, MarketMakerConfig};
use crate::strategy::StrategyKind;

/// Arguments of the `run` subcommand, before they are merged into the
/// file configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    /// Overrides `inst_id` from the file
    pub inst_id: Option<String>,
    /// Overrides `strategy_type` from the file
    pub strategy: Option<StrategyKind>,
    pub live: bool,
    pub health_port: Option<u16>,
    /// Seed for the paper market generator
    pub seed: Option<u64>,
}

impl RunOptions {
    /// Loads the file (or defaults), applies the CLI overrides and validates
    /// the result.
    ///
    /// # Errors
    /// `ConfigError` for unreadable files, bad JSON, out-of-range values, or
    /// `--live` (no live transport is bundled).
    pub fn resolve(&self) -> Result<MarketMakerConfig, ConfigError> {
        if self.live {
            return Err(ConfigError::Invalid {
                field: "live",
                reason: "no live exchange transport is bundled; run without --live for paper trading"
                    .to_string(),
            });
        }

        let mut config = match &self.config {
            Some(path) => MarketMakerConfig::load(path)?,
            None => MarketMakerConfig::default(),
        };
        if let Some(inst_id) = &self.inst_id {
            config.inst_id = inst_id.trim().to_uppercase();
        }
        if let Some(strategy) = self.strategy {
            config.strategy_type = strategy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"inst_id": "ETH-USDT", "strategy_type": "grid", "step_pct": "0.002"}}"#).unwrap();

        let options = RunOptions {
            config: Some(file.path().to_path_buf()),
            inst_id: Some("sol-usdt".to_string()),
            strategy: Some(StrategyKind::Volatility),
            ..RunOptions::default()
        };
        let config = options.resolve().unwrap();
        assert_eq!(config.inst_id, "SOL-USDT");
        assert_eq!(config.strategy_type, StrategyKind::Volatility);
        assert_eq!(config.step_pct, rust_decimal_macros::dec!(0.002));
    }

    #[test]
    fn test_live_mode_refused() {
        let options = RunOptions {
            live: true,
            ..RunOptions::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::Invalid { field: "live", .. })
        ));
    }

    #[test]
    fn test_defaults_without_file() {
        let config = RunOptions::default().resolve().unwrap();
        assert_eq!(config, MarketMakerConfig::default());
    }
}
