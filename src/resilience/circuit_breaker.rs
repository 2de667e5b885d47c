//! # Trading API Circuit Breaker
//!
//! Suspends new order flow after repeated trading API failures.
//!
//! ## States
//! - **Closed**: requests pass through.
//! - **Open**: entered after `failure_threshold` consecutive failed batches;
//!   placements and amends are refused until `cooldown` has elapsed.
//! - **HalfOpen**: after the cooldown, traffic is let through again; the next
//!   result closes or re-opens the breaker.
//!
//! Cancels are never gated by the breaker: pulling orders is always allowed.
//!
//! ## Usage
//! ```ignore
//! let breaker = CircuitBreaker::new("trading_api", 5, Duration::from_secs(30));
//!
//! if breaker.is_open() {
//!     return; // skip placements this cycle
//! }
//! match api.place_orders(&batch).await {
//!     Ok(_) => breaker.record_success(),
//!     Err(_) => breaker.record_failure(),
//! }
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::metrics;

/// Breaker state (encoded as u32 for atomic operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => CircuitState::HalfOpen,
            2 => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free consecutive-failure breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    state: AtomicU32,
    failures: AtomicU32,
    /// Time of the trip, as nanoseconds since `epoch`
    opened_at_nanos: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            state: AtomicU32::new(CircuitState::Closed as u32),
            failures: AtomicU32::new(0),
            opened_at_nanos: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u32, Ordering::Release);
        metrics::set_circuit_state(self.name, state as u32 as f64);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if self.state() != CircuitState::Closed {
            info!(breaker = self.name, "Circuit breaker closed");
            self.set_state(CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        let current = self.state.load(Ordering::Acquire);

        // A failed probe re-opens immediately
        let should_open = current == CircuitState::HalfOpen as u32 || count >= self.failure_threshold;
        if should_open
            && current != CircuitState::Open as u32
            && self
                .state
                .compare_exchange(current, CircuitState::Open as u32, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.opened_at_nanos.store(self.elapsed_nanos(), Ordering::Release);
            metrics::set_circuit_state(self.name, CircuitState::Open as u32 as f64);
            metrics::record_circuit_trip(self.name);
            warn!(
                breaker = self.name,
                failures = count,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "Circuit breaker tripped to OPEN"
            );
        }
    }

    /// `true` while open and cooling down. Moves to HalfOpen once the
    /// cooldown has elapsed.
    pub fn is_open(&self) -> bool {
        if self.state.load(Ordering::Acquire) != CircuitState::Open as u32 {
            return false;
        }
        let opened_at = self.opened_at_nanos.load(Ordering::Acquire);
        if self.elapsed_nanos().saturating_sub(opened_at) <= self.cooldown.as_nanos() as u64 {
            return true;
        }
        if self
            .state
            .compare_exchange(
                CircuitState::Open as u32,
                CircuitState::HalfOpen as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.failures.store(0, Ordering::Release);
            metrics::set_circuit_state(self.name, CircuitState::HalfOpen as u32 as f64);
            info!(breaker = self.name, "Circuit breaker cooldown elapsed, probing");
        }
        false
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.opened_at_nanos.store(0, Ordering::Release);
        self.set_state(CircuitState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(10));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_trips_after_threshold() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A failed probe re-opens without waiting for the threshold
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_concurrent_failures() {
        use std::sync::Arc;
        use std::thread;

        let breaker = Arc::new(CircuitBreaker::new("test", 100, Duration::from_secs(60)));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let b = Arc::clone(&breaker);
                thread::spawn(move || {
                    for _ in 0..50 {
                        b.record_failure();
                        let _ = b.is_open();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(breaker.is_open());
    }
}
