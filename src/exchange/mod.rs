//! Exchange Abstraction Layer
//!
//! The coordinator talks to the venue only through [`TradingApi`]. Transport,
//! authentication, reconnects and retry internals live behind it.
//!
//! Batched calls accept at most [`MAX_BATCH_SIZE`] entries and return one
//! [`OrderAck`] per entry, so a partial failure never hides the successes.

pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub use crate::orders::{ClientOrderId, OrderUpdate};
pub use crate::types::{Instrument, OrderSide};
use crate::config::TradingMode;
pub use paper::{PaperExchange, PaperSettings};

/// Largest batch the exchange accepts per request.
pub const MAX_BATCH_SIZE: usize = 20;

/// Trading API failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Timeout or connection failure; the outcome of the request is unknown.
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange refused this order (insufficient margin, bad price, ...).
    #[error("rejected by exchange ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("order not found: {0}")]
    NotFound(ClientOrderId),

    /// Refused locally before reaching the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// New limit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceRequest {
    pub cl_ord_id: ClientOrderId,
    pub inst_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub trade_mode: TradingMode,
    pub post_only: bool,
}

/// Change of price and/or size of a working order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmendRequest {
    pub cl_ord_id: ClientOrderId,
    pub inst_id: String,
    pub new_price: Option<Decimal>,
    pub new_size: Option<Decimal>,
}

impl AmendRequest {
    /// An amend must name an order and change at least one of price or size.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.cl_ord_id.as_str().is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "amend requires a client order id".to_string(),
            ));
        }
        if self.new_price.is_none() && self.new_size.is_none() {
            return Err(ExchangeError::InvalidRequest(format!(
                "amend for {} changes neither price nor size",
                self.cl_ord_id
            )));
        }
        if matches!(self.new_price, Some(p) if p <= Decimal::ZERO)
            || matches!(self.new_size, Some(s) if s <= Decimal::ZERO)
        {
            return Err(ExchangeError::InvalidRequest(format!(
                "amend for {} has a non-positive price or size",
                self.cl_ord_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub cl_ord_id: ClientOrderId,
    pub inst_id: String,
}

/// Per-entry result of a batched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub cl_ord_id: ClientOrderId,
    /// Exchange order id, when the venue returned one
    pub ord_id: Option<String>,
    pub result: Result<(), ExchangeError>,
}

impl OrderAck {
    pub fn accepted(cl_ord_id: ClientOrderId, ord_id: Option<String>) -> Self {
        Self {
            cl_ord_id,
            ord_id,
            result: Ok(()),
        }
    }

    pub fn rejected(cl_ord_id: ClientOrderId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cl_ord_id,
            ord_id: None,
            result: Err(ExchangeError::Rejected {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Order entry and lookup on the venue.
///
/// Implementations must treat a duplicate client order id as a no-op.
#[async_trait]
pub trait TradingApi: Send + Sync {
    async fn instrument(&self, inst_id: &str) -> Result<Instrument, ExchangeError>;

    /// Currently working orders, used to rebuild state at startup.
    async fn pending_orders(&self, inst_id: &str) -> Result<Vec<OrderUpdate>, ExchangeError>;

    async fn place_orders(&self, orders: &[PlaceRequest]) -> Result<Vec<OrderAck>, ExchangeError>;

    async fn amend_orders(&self, amends: &[AmendRequest]) -> Result<Vec<OrderAck>, ExchangeError>;

    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> Result<Vec<OrderAck>, ExchangeError>;

    /// Current state of one order, `None` if the exchange has no record of it.
    async fn order_status(
        &self,
        inst_id: &str,
        cl_ord_id: &ClientOrderId,
    ) -> Result<Option<OrderUpdate>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amend(price: Option<Decimal>, size: Option<Decimal>) -> AmendRequest {
        AmendRequest {
            cl_ord_id: "mm1".into(),
            inst_id: "BTC-USDT".into(),
            new_price: price,
            new_size: size,
        }
    }

    #[test]
    fn test_amend_requires_a_change() {
        assert!(amend(None, None).validate().is_err());
        assert!(amend(Some(dec!(100)), None).validate().is_ok());
        assert!(amend(None, Some(dec!(2))).validate().is_ok());
        assert!(amend(Some(dec!(0)), None).validate().is_err());
    }

    #[test]
    fn test_amend_requires_id() {
        let mut request = amend(Some(dec!(100)), None);
        request.cl_ord_id = ClientOrderId::new("");
        assert!(matches!(request.validate(), Err(ExchangeError::InvalidRequest(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Transport("timeout".into()).is_transient());
        assert!(!ExchangeError::NotFound("mm1".into()).is_transient());
    }
}
