//! CLI argument parsing using clap.

mod config;

pub use config::RunOptions;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::strategy::StrategyKind;

/// quoteforge - single-instrument market maker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the market maker (paper venue unless --live)
    Run {
        /// Instrument to quote (e.g., "BTC-USDT"), overrides the config file
        #[arg(long)]
        inst_id: Option<String>,
        /// Strategy: 'grid', 'inventory_skew' or 'volatility'
        #[arg(long)]
        strategy: Option<StrategyKind>,
        /// Path to the JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Trade against the live exchange
        #[arg(long, default_value_t = false)]
        live: bool,
        /// Serve /health and /metrics on this port
        #[arg(long)]
        health_port: Option<u16>,
        /// Seed for the paper market generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

impl Commands {
    /// Collects the `run` arguments. `None` for other subcommands.
    pub fn run_options(&self) -> Option<RunOptions> {
        match self {
            Commands::Run {
                inst_id,
                strategy,
                config,
                live,
                health_port,
                seed,
            } => Some(RunOptions {
                config: config.clone(),
                inst_id: inst_id.clone(),
                strategy: *strategy,
                live: *live,
                health_port: *health_port,
                seed: *seed,
            }),
            Commands::CheckConfig { .. } => None,
        }
    }
}
