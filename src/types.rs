//! Common Types Module
//!
//! Market and account data shared by the feeds, the context and the strategies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Position direction as reported by the exchange.
///
/// `Net` positions carry their own sign in `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Net,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
            PositionSide::Net => write!(f, "net"),
        }
    }
}

/// One price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot with both sides ordered best-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub inst_id: String,
    /// Descending by price
    pub bids: Vec<BookLevel>,
    /// Ascending by price
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Builds a book, sorting both sides best-first and dropping empty levels.
    pub fn new(inst_id: impl Into<String>, mut bids: Vec<BookLevel>, mut asks: Vec<BookLevel>) -> Self {
        bids.retain(|l| l.size > Decimal::ZERO);
        asks.retain(|l| l.size > Decimal::ZERO);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            inst_id: inst_id.into(),
            bids,
            asks,
            timestamp: Utc::now(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// `(best_bid + best_ask) / 2`, or `None` if either side is empty.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / dec!(2)),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// Latest ticker for the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub inst_id: String,
    pub last: Decimal,
    /// Mark price, when the venue publishes one (derivatives).
    pub mark: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Trading rules of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub inst_id: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_size: Decimal,
}

impl Instrument {
    /// Conservative rules used until the real instrument has been loaded.
    pub fn fallback(inst_id: impl Into<String>) -> Self {
        Self {
            inst_id: inst_id.into(),
            tick_size: dec!(0.01),
            lot_size: dec!(0.0001),
            min_size: dec!(0.0001),
        }
    }
}

/// Balance of a single currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub currency: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

/// Account balance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Total equity in USD
    pub total_equity: Decimal,
    pub currencies: Vec<CurrencyBalance>,
    pub timestamp: DateTime<Utc>,
}

impl AccountBalance {
    pub fn available(&self, currency: &str) -> Decimal {
        self.currencies
            .iter()
            .find(|c| c.currency == currency)
            .map(|c| c.available)
            .unwrap_or(Decimal::ZERO)
    }
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub inst_id: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
}

impl Position {
    /// Size with long positive and short negative.
    pub fn signed_size(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.size.abs(),
            PositionSide::Short => -self.size.abs(),
            PositionSide::Net => self.size,
        }
    }
}
