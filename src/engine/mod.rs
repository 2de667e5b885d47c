//! Engine Module
//!
//! The [`Orchestrator`] owns the feed tasks and runs the periodic
//! health → risk → strategy → reconcile cycle; [`EngineHandle`] is the
//! outside view of it (state, shutdown, operator resume).

pub mod orchestrator;

pub use orchestrator::{EngineHandle, Orchestrator};

use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::health::HealthError;
use crate::orders::OrderStateError;

/// Lifecycle of the coordinator.
///
/// `Initializing -> Running <-> Paused -> Stopping -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Initializing,
    Running,
    /// Market data stale, or held after an emergency stop
    Paused,
    Stopping,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Numeric encoding for the state gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Initializing => 0.0,
            Self::Running => 1.0,
            Self::Paused => 2.0,
            Self::Stopping => 3.0,
            Self::Stopped => 4.0,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("trading API: {0}")]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    OrderState(#[from] OrderStateError),

    #[error("engine can only be run once")]
    AlreadyStarted,
}
