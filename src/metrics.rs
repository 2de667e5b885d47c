//! Prometheus Metrics Module
//!
//! Pre-registered metrics for the coordinator. Registration happens lazily on
//! first use; all updates are atomic.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // --- Order Metrics ---

    /// Order actions by kind (place, amend, cancel) and outcome
    pub static ref ORDER_ACTIONS: IntCounterVec = register_int_counter_vec!(
        opts!("quoteforge_order_actions_total", "Order actions sent to the exchange"),
        &["action", "outcome"]
    ).expect("FATAL: Failed to register ORDER_ACTIONS metric - check for duplicate registration");

    /// Trading API request latency in seconds
    pub static ref API_LATENCY: Histogram = register_histogram!(
        "quoteforge_api_latency_seconds",
        "Trading API batch latency",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    ).expect("FATAL: Failed to register API_LATENCY metric - check for duplicate registration");

    // --- Engine Metrics ---

    /// Duration of strategy/reconcile cycles
    pub static ref CYCLE_DURATION: Histogram = register_histogram!(
        "quoteforge_cycle_duration_seconds",
        "Strategy and reconcile cycle duration",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).expect("FATAL: Failed to register CYCLE_DURATION metric - check for duplicate registration");

    /// Cycles skipped, by reason (stale, timeout)
    pub static ref SKIPPED_CYCLES: IntCounterVec = register_int_counter_vec!(
        opts!("quoteforge_skipped_cycles_total", "Strategy cycles skipped"),
        &["reason"]
    ).expect("FATAL: Failed to register SKIPPED_CYCLES metric - check for duplicate registration");

    pub static ref EMERGENCY_STOPS: IntCounter = register_int_counter!(
        opts!("quoteforge_emergency_stops_total", "Emergency stops triggered")
    ).expect("FATAL: Failed to register EMERGENCY_STOPS metric - check for duplicate registration");

    /// Engine state (0=initializing, 1=running, 2=paused, 3=stopping, 4=stopped)
    pub static ref ENGINE_STATE: GaugeVec = register_gauge_vec!(
        opts!("quoteforge_engine_state", "Orchestrator state"),
        &["inst_id"]
    ).expect("FATAL: Failed to register ENGINE_STATE metric - check for duplicate registration");

    // --- Risk Metrics ---

    pub static ref NET_POSITION: GaugeVec = register_gauge_vec!(
        opts!("quoteforge_net_position", "Net position"),
        &["inst_id"]
    ).expect("FATAL: Failed to register NET_POSITION metric - check for duplicate registration");

    pub static ref EXPOSURE: GaugeVec = register_gauge_vec!(
        opts!("quoteforge_exposure", "Position exposure in quote currency"),
        &["inst_id"]
    ).expect("FATAL: Failed to register EXPOSURE metric - check for duplicate registration");

    // --- Feed Metrics ---

    pub static ref FEED_UPDATES: IntCounterVec = register_int_counter_vec!(
        opts!("quoteforge_feed_updates_total", "Updates applied per feed"),
        &["feed"]
    ).expect("FATAL: Failed to register FEED_UPDATES metric - check for duplicate registration");

    // --- Circuit Breaker Metrics ---

    /// Circuit breaker state (0=closed, 1=half_open, 2=open)
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        opts!("quoteforge_circuit_breaker_state", "Circuit breaker state (0=closed, 1=half_open, 2=open)"),
        &["name"]
    ).expect("FATAL: Failed to register CIRCUIT_BREAKER_STATE metric - check for duplicate registration");

    pub static ref CIRCUIT_BREAKER_TRIPS: IntCounterVec = register_int_counter_vec!(
        opts!("quoteforge_circuit_breaker_trips_total", "Circuit breaker trips"),
        &["name"]
    ).expect("FATAL: Failed to register CIRCUIT_BREAKER_TRIPS metric - check for duplicate registration");
}

pub fn record_order_action(action: &str, outcome: &str) {
    ORDER_ACTIONS.with_label_values(&[action, outcome]).inc();
}

pub fn record_api_latency(latency_secs: f64) {
    API_LATENCY.observe(latency_secs);
}

pub fn record_cycle(duration_secs: f64) {
    CYCLE_DURATION.observe(duration_secs);
}

pub fn record_skipped_cycle(reason: &str) {
    SKIPPED_CYCLES.with_label_values(&[reason]).inc();
}

pub fn record_emergency_stop() {
    EMERGENCY_STOPS.inc();
}

pub fn set_engine_state(inst_id: &str, state: f64) {
    ENGINE_STATE.with_label_values(&[inst_id]).set(state);
}

pub fn set_risk(inst_id: &str, net_position: f64, exposure: f64) {
    NET_POSITION.with_label_values(&[inst_id]).set(net_position);
    EXPOSURE.with_label_values(&[inst_id]).set(exposure);
}

pub fn record_feed_update(feed: &str) {
    FEED_UPDATES.with_label_values(&[feed]).inc();
}

pub fn set_circuit_state(name: &str, state: f64) {
    CIRCUIT_BREAKER_STATE.with_label_values(&[name]).set(state);
}

pub fn record_circuit_trip(name: &str) {
    CIRCUIT_BREAKER_TRIPS.with_label_values(&[name]).inc();
}

/// Metrics as text for the /metrics endpoint. Encoding failures are logged
/// and yield an empty body.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}
