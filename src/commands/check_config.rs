//! Check-config command handler.

use std::path::Path;

use tracing::info;

use crate::config::MarketMakerConfig;

/// Loads and validates a config file, then prints the effective settings
/// (defaults filled in) as JSON.
///
/// # Errors
/// Returns the first load or validation error.
pub fn run_check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = MarketMakerConfig::load(path)?;
    config.validate()?;
    info!(path = %path.display(), inst_id = %config.inst_id, "Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
