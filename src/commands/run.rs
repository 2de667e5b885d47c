//! Run command handler.
//!
//! Wires the paper venue, the feed channels and the orchestrator, then
//! waits for Ctrl-C or an emergency halt.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::RunOptions;
use crate::engine::Orchestrator;
use crate::exchange::{PaperExchange, PaperSettings};
use crate::feeds::feed_channels;
use crate::health::{create_health_state, run_health_server};

const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Run the market maker against the bundled paper venue.
///
/// # Errors
/// Returns error if the configuration is invalid or the engine fails to
/// bootstrap.
pub async fn run_market_maker(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.resolve()?;
    info!(
        inst_id = %config.inst_id,
        strategy = %config.strategy_type,
        levels = config.num_orders_per_side,
        "Starting market maker (paper)"
    );

    let (senders, channels) = feed_channels(FEED_CHANNEL_CAPACITY);
    let mut settings = PaperSettings::new(config.inst_id.clone());
    settings.seed = options.seed;
    let venue = Arc::new(PaperExchange::new(settings, senders));

    let background = CancellationToken::new();
    let simulator = venue.clone().spawn_simulator(background.child_token());

    let (mut engine, handle) = Orchestrator::new(config, venue, channels)?;

    let mut health_task = None;
    if let Some(port) = options.health_port {
        let state = create_health_state();
        engine = engine.with_health_state(state.clone());
        health_task = Some(tokio::spawn(run_health_server(
            port,
            state,
            background.child_token(),
        )));
    }

    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let result = engine.run().await;

    background.cancel();
    let _ = simulator.await;
    if let Some(task) = health_task {
        let _ = task.await;
    }

    info!(state = %handle.state(), "Market maker stopped");
    result.map_err(Into::into)
}
