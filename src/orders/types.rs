//! Core types for order management.
//!
//! Provides type-safe client order identifiers and the strategy order state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::types::OrderSide;

/// Type-safe client order identifier (generated locally).
///
/// Used as the idempotency key for every request sent to the exchange.
///
/// # Example
///
/// ```
/// use quoteforge::orders::ClientOrderId;
///
/// let id = ClientOrderId::new("mm123456000001");
/// assert_eq!(id.as_str(), "mm123456000001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        if s.is_empty() {
            tracing::warn!("Creating ClientOrderId with empty string - exchange will reject it");
        }
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Strategy order lifecycle.
///
/// States are ordered: `Pending < Sent < Ack < Live < {Filled, Canceled, Rejected}`.
/// Transitions only ever move forward, and the three terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Created locally, not yet sent
    Pending,
    /// Place call issued, no answer yet
    Sent,
    /// Exchange accepted the request
    Ack,
    /// Confirmed resting on the book
    Live,
    Filled,
    Canceled,
    Rejected,
}

impl OrderState {
    /// Position along the lifecycle. Terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Ack => 2,
            Self::Live => 3,
            Self::Filled | Self::Canceled | Self::Rejected => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Orders that may be amended in place.
    pub fn is_amendable(&self) -> bool {
        matches!(self, Self::Ack | Self::Live)
    }

    /// Whether `next` is a legal successor. Staying in the same non-terminal
    /// state is allowed so that fill progress on a live order can be applied.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    /// Maps an exchange order state string onto the lifecycle.
    pub fn from_exchange(state: &str) -> Option<Self> {
        match state {
            "live" | "partially_filled" => Some(Self::Live),
            "filled" => Some(Self::Filled),
            "canceled" | "mmp_canceled" => Some(Self::Canceled),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Sent => write!(f, "SENT"),
            Self::Ack => write!(f, "ACK"),
            Self::Live => write!(f, "LIVE"),
            Self::Filled => write!(f, "FILLED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Errors raised by order state bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderStateError {
    /// Regressive or post-terminal transition
    #[error("Invalid state transition for order {0}: {1} -> {2}")]
    InvalidTransition(ClientOrderId, OrderState, OrderState),

    #[error("Order not found: {0}")]
    UnknownOrder(ClientOrderId),

    #[error("Duplicate client order id: {0}")]
    DuplicateId(ClientOrderId),
}

/// A working order owned by the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOrder {
    pub cl_ord_id: ClientOrderId,
    /// Exchange-assigned id, known once acknowledged
    pub ord_id: Option<String>,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the place call went out; drives the ack timeout.
    pub sent_at: Option<Instant>,
}

impl StrategyOrder {
    pub fn pending(cl_ord_id: ClientOrderId, side: OrderSide, price: Decimal, size: Decimal) -> Self {
        let now = Utc::now();
        Self {
            cl_ord_id,
            ord_id: None,
            side,
            price,
            size,
            filled_size: Decimal::ZERO,
            avg_fill_price: None,
            state: OrderState::Pending,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    /// Builds a tracked order from an exchange report about an order we did
    /// not know yet (startup bootstrap, or an update racing our own insert).
    pub fn from_update(update: &OrderUpdate) -> Self {
        let now = Utc::now();
        Self {
            cl_ord_id: update.cl_ord_id.clone(),
            ord_id: update.ord_id.clone(),
            side: update.side,
            price: update.price,
            size: update.size,
            filled_size: update.filled_size,
            avg_fill_price: update.avg_fill_price,
            state: update.state,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn remaining_size(&self) -> Decimal {
        (self.size - self.filled_size).max(Decimal::ZERO)
    }

    /// Not yet terminal.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn distance_from(&self, mid: Decimal) -> Decimal {
        (self.price - mid).abs()
    }

    /// Moves the order forward, refusing regressions.
    pub fn transition(&mut self, next: OrderState) -> Result<(), OrderStateError> {
        if !self.state.can_transition_to(next) {
            return Err(OrderStateError::InvalidTransition(
                self.cl_ord_id.clone(),
                self.state,
                next,
            ));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Exchange-reported state of one order, as delivered by the private order feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub cl_ord_id: ClientOrderId,
    pub ord_id: Option<String>,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    /// Cumulative filled size
    pub filled_size: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub state: OrderState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rank_order() {
        assert!(OrderState::Pending.rank() < OrderState::Sent.rank());
        assert!(OrderState::Sent.rank() < OrderState::Ack.rank());
        assert!(OrderState::Ack.rank() < OrderState::Live.rank());
        assert!(OrderState::Live.rank() < OrderState::Filled.rank());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [OrderState::Filled, OrderState::Canceled, OrderState::Rejected] {
            for next in [
                OrderState::Pending,
                OrderState::Live,
                OrderState::Filled,
                OrderState::Canceled,
                OrderState::Rejected,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_regression_refused() {
        let mut order = StrategyOrder::pending("mm1".into(), OrderSide::Buy, dec!(100), dec!(1));
        order.transition(OrderState::Sent).unwrap();
        order.transition(OrderState::Live).unwrap();

        let err = order.transition(OrderState::Ack).unwrap_err();
        assert_eq!(
            err,
            OrderStateError::InvalidTransition("mm1".into(), OrderState::Live, OrderState::Ack)
        );
        assert_eq!(order.state, OrderState::Live);
    }

    #[test]
    fn test_exchange_state_mapping() {
        assert_eq!(OrderState::from_exchange("partially_filled"), Some(OrderState::Live));
        assert_eq!(OrderState::from_exchange("mmp_canceled"), Some(OrderState::Canceled));
        assert_eq!(OrderState::from_exchange("unknown"), None);
    }

    #[test]
    fn test_remaining_size() {
        let mut order = StrategyOrder::pending("mm2".into(), OrderSide::Sell, dec!(100), dec!(1));
        order.filled_size = dec!(0.4);
        assert_eq!(order.remaining_size(), dec!(0.6));
    }
}
