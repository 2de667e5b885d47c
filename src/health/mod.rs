//! Health Module
//!
//! - `HealthChecker` - per-feed staleness verdicts and the unhealthy-cycle streak
//! - `server` - HTTP `/health` and `/metrics` endpoints for monitoring

mod checker;
pub mod server;

pub use checker::{HealthChecker, HealthError, HealthReport, HealthThresholds};
pub use server::{
    create_health_state, run_health_server, update_health, HealthResponse, HealthSample, HealthState,
};
