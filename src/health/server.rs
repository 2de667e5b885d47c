//! Health check HTTP endpoint for monitoring.
//!
//! `/health` returns the latest [`HealthResponse`] published by the
//! orchestrator, `/metrics` the Prometheus text exposition.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::context::FeedKind;
use crate::metrics;
use crate::resilience::CircuitState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    /// "healthy", "degraded" or "critical"
    pub status: String,
    pub version: String,
    pub engine_state: String,
    pub consecutive_failures: u32,
    pub stale_feeds: Vec<String>,
    pub breaker_state: String,
    pub live_orders: usize,
    /// Stdev of recent mids over the mid, absent until two mids are seen.
    pub volatility: Option<f64>,
    pub uptime_seconds: u64,
    pub timestamp: i64,
    #[serde(skip, default = "Instant::now")]
    started_at: Instant,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "degraded".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine_state: "initializing".to_string(),
            consecutive_failures: 0,
            stale_feeds: Vec::new(),
            breaker_state: CircuitState::Closed.as_str().to_string(),
            live_orders: 0,
            volatility: None,
            uptime_seconds: 0,
            timestamp: Utc::now().timestamp(),
            started_at: Instant::now(),
        }
    }
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// What the orchestrator knows at the end of a cycle.
#[derive(Debug, Clone)]
pub struct HealthSample<'a> {
    pub engine_state: &'a str,
    pub consecutive_failures: u32,
    pub stale_feeds: &'a [FeedKind],
    pub breaker: CircuitState,
    pub live_orders: usize,
    pub volatility: Option<f64>,
}

impl HealthSample<'_> {
    fn status(&self) -> &'static str {
        if self.engine_state != "running" || self.breaker == CircuitState::Open {
            "critical"
        } else if !self.stale_feeds.is_empty() || self.breaker == CircuitState::HalfOpen {
            "degraded"
        } else {
            "healthy"
        }
    }
}

pub type HealthState = Arc<RwLock<HealthResponse>>;

pub fn create_health_state() -> HealthState {
    Arc::new(RwLock::new(HealthResponse::default()))
}

pub async fn update_health(state: &HealthState, sample: HealthSample<'_>) {
    let mut health = state.write().await;
    health.status = sample.status().to_string();
    health.engine_state = sample.engine_state.to_string();
    health.consecutive_failures = sample.consecutive_failures;
    health.stale_feeds = sample.stale_feeds.iter().map(|f| f.as_str().to_string()).collect();
    health.breaker_state = sample.breaker.as_str().to_string();
    health.live_orders = sample.live_orders;
    health.volatility = sample.volatility;
    health.uptime_seconds = health.started_at.elapsed().as_secs();
    health.timestamp = Utc::now().timestamp();
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.read().await.clone();
    let code = if health.status == "critical" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(health))
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Serves `/health` and `/metrics` until `shutdown` fires. A bind failure is
/// logged and the engine keeps running without the endpoint.
pub async fn run_health_server(port: u16, state: HealthState, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(
                "Health server failed to bind to {}: {}. Continuing without health endpoint.",
                addr,
                e
            );
            return;
        }
    };
    tracing::info!("Health check server listening on {}", addr);

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = served {
        tracing::error!("Health check server failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(engine_state: &'a str, stale: &'a [FeedKind], breaker: CircuitState) -> HealthSample<'a> {
        HealthSample {
            engine_state,
            consecutive_failures: 0,
            stale_feeds: stale,
            breaker,
            live_orders: 4,
            volatility: Some(0.0025),
        }
    }

    #[tokio::test]
    async fn test_status_follows_engine_and_feeds() {
        let state = create_health_state();
        update_health(&state, sample("running", &[], CircuitState::Closed)).await;
        assert!(state.read().await.is_healthy());

        update_health(&state, sample("running", &[FeedKind::OrderBook], CircuitState::Closed)).await;
        let health = state.read().await.clone();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.stale_feeds, vec!["orderbook".to_string()]);

        update_health(&state, sample("paused", &[], CircuitState::Closed)).await;
        assert_eq!(state.read().await.status, "critical");

        update_health(&state, sample("running", &[], CircuitState::Open)).await;
        assert_eq!(state.read().await.breaker_state, "open");
    }

    #[tokio::test]
    async fn test_health_serializes_without_internal_clock() {
        let state = create_health_state();
        update_health(&state, sample("running", &[], CircuitState::Closed)).await;
        let json = serde_json::to_value(&*state.read().await).unwrap();
        assert_eq!(json["live_orders"], 4);
        assert_eq!(json["volatility"], 0.0025);
        assert_eq!(json["engine_state"], "running");
        assert!(json.get("started_at").is_none());
    }
}
