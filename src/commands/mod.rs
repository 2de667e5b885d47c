//! CLI command handlers.
//!
//! One function per subcommand; `main` only parses and dispatches.

mod check_config;
mod run;

pub use check_config::run_check_config;
pub use run::run_market_maker;
