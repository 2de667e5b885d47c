//! Feed freshness evaluation.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::MarketMakerConfig;
use crate::context::{FeedKind, MarketSnapshot};

/// Stale-data condition. Non-fatal: the affected cycle is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("stale market data: {}", format_feeds(.feeds))]
    Stale { feeds: Vec<FeedKind> },
}

fn format_feeds(feeds: &[FeedKind]) -> String {
    feeds.iter().map(FeedKind::as_str).collect::<Vec<_>>().join(", ")
}

/// Maximum acceptable delay per feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    pub orderbook: Duration,
    pub account: Duration,
    /// Private order updates only arrive on change, so silence is normal.
    pub monitor_orders: bool,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            orderbook: Duration::from_secs(5),
            account: Duration::from_secs(10),
            monitor_orders: false,
        }
    }
}

impl HealthThresholds {
    pub fn from_config(config: &MarketMakerConfig) -> Self {
        Self {
            orderbook: config.orderbook_max_delay(),
            account: config.account_max_delay(),
            monitor_orders: config.monitor_orders_feed,
        }
    }

    /// `None` when the feed is not monitored.
    pub fn max_delay(&self, feed: FeedKind) -> Option<Duration> {
        match feed {
            FeedKind::OrderBook | FeedKind::Ticker => Some(self.orderbook),
            FeedKind::Account | FeedKind::Positions => Some(self.account),
            FeedKind::Orders => self.monitor_orders.then_some(self.account),
        }
    }
}

/// Freshness verdict for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub fresh: bool,
    pub stale_feeds: Vec<FeedKind>,
}

impl HealthReport {
    pub fn into_result(self) -> Result<(), HealthError> {
        if self.fresh {
            Ok(())
        } else {
            Err(HealthError::Stale {
                feeds: self.stale_feeds,
            })
        }
    }
}

/// Evaluates feed freshness and counts consecutive unhealthy cycles.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    thresholds: HealthThresholds,
    consecutive_failures: u32,
}

impl HealthChecker {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            consecutive_failures: 0,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// A feed is stale when `now - last_update > max_delay`; a feed that never
    /// updated is always stale. Equality is fresh.
    pub fn is_fresh(snapshot: &MarketSnapshot, thresholds: &HealthThresholds, now: Instant) -> HealthReport {
        let stale_feeds: Vec<FeedKind> = FeedKind::ALL
            .into_iter()
            .filter(|feed| match thresholds.max_delay(*feed) {
                None => false,
                Some(max_delay) => match snapshot.last_update(*feed) {
                    None => true,
                    Some(last) => now.saturating_duration_since(last) > max_delay,
                },
            })
            .collect();

        HealthReport {
            fresh: stale_feeds.is_empty(),
            stale_feeds,
        }
    }

    /// Evaluates `snapshot` and updates the failure streak.
    pub fn check(&mut self, snapshot: &MarketSnapshot, now: Instant) -> HealthReport {
        let report = Self::is_fresh(snapshot, &self.thresholds, now);
        self.record(&report);
        report
    }

    pub fn record(&mut self, report: &HealthReport) {
        if report.fresh {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn should_emergency_stop(&self, threshold: u32) -> bool {
        threshold > 0 && self.consecutive_failures >= threshold
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}
