//! # Resilience Module
//!
//! ## Components
//! - `CircuitBreaker`: suspends placements after repeated trading API failures.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
