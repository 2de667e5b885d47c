//! quoteforge: a single-instrument market-making coordinator.
//!
//! Feed ingestors keep a shared [`context::MarketContext`] current; the
//! [`engine::Orchestrator`] runs health, risk, strategy and reconciliation
//! once per cycle against a [`exchange::TradingApi`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod exchange;
pub mod feeds;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod orders;
pub mod resilience;
pub mod risk;
pub mod strategy;
pub mod types;
