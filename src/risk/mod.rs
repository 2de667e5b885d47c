//! Risk Management Module
//!
//! Computes net position, exposure, P&L and limit breaches for each cycle.

mod calculator;

pub use calculator::{RiskCalculator, RiskFlag, RiskLimits, RiskSnapshot};
