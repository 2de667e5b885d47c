use clap::Parser;
use dotenv::dotenv;
use tracing::error;

use quoteforge::cli::{Cli, Commands};
use quoteforge::commands::{run_check_config, run_market_maker};
use quoteforge::logging;

#[tokio::main]
async fn main() {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(&cli.verbose, cli.json_logs) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let result = match &cli.command {
        Commands::Run { .. } => match cli.command.run_options() {
            Some(options) => run_market_maker(options).await,
            None => Ok(()),
        },
        Commands::CheckConfig { config } => run_check_config(config),
    };

    if let Err(e) = result {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
