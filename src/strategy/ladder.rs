//! Shared price-ladder construction.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::{Quote, QuoteParams};
use crate::risk::{RiskFlag, RiskSnapshot};
use crate::types::{Instrument, OrderSide};

/// Rounds to the nearest multiple of `tick` (halves away from zero).
pub fn round_price(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let ticks = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (ticks * tick).normalize()
}

/// Rounds down to a multiple of `lot` so sizes never exceed what was asked.
pub fn round_size(size: Decimal, lot: Decimal) -> Decimal {
    if lot <= Decimal::ZERO {
        return size;
    }
    let lots = (size / lot).round_dp_with_strategy(0, RoundingStrategy::ToZero);
    (lots * lot).normalize()
}

/// Number of levels each side may quote without breaching a position limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SideCapacity {
    pub buy: usize,
    pub sell: usize,
}

pub(crate) fn side_capacity(params: &QuoteParams, risk: &RiskSnapshot) -> SideCapacity {
    let net = risk.net_position;
    let value_breached = risk.is_breached(RiskFlag::MaxPositionValue);

    let buy = if risk.is_breached(RiskFlag::MaxNetBuy) || (value_breached && net > Decimal::ZERO) {
        0
    } else {
        levels_within(params.max_net_buy - net, params.order_size, params.levels)
    };
    let sell = if risk.is_breached(RiskFlag::MaxNetSell) || (value_breached && net < Decimal::ZERO) {
        0
    } else {
        levels_within(params.max_net_sell + net, params.order_size, params.levels)
    };

    SideCapacity { buy, sell }
}

/// Levels of `size` that fit in `headroom`, capped at `max_levels`.
fn levels_within(headroom: Decimal, size: Decimal, max_levels: usize) -> usize {
    if headroom <= Decimal::ZERO || size <= Decimal::ZERO {
        return 0;
    }
    (headroom / size)
        .floor()
        .to_usize()
        .unwrap_or(max_levels)
        .min(max_levels)
}

/// Builds symmetric levels around `center`.
///
/// Level `k` sits at `center * (1 - offsets[k])` for buys and
/// `center * (1 + offsets[k])` for sells. Each side is truncated to its
/// capacity, prices are rounded to tick, sizes to lot, and levels that round
/// onto the previous one or fall under the minimum size are dropped.
pub(crate) fn build_ladder(
    center: Decimal,
    offsets: &[Decimal],
    size: Decimal,
    capacity: SideCapacity,
    instrument: &Instrument,
) -> Vec<Quote> {
    let size = round_size(size, instrument.lot_size);
    if size < instrument.min_size || size <= Decimal::ZERO {
        return Vec::new();
    }

    let mut quotes = Vec::with_capacity(capacity.buy + capacity.sell);
    for (side, limit) in [(OrderSide::Buy, capacity.buy), (OrderSide::Sell, capacity.sell)] {
        let mut last_price: Option<Decimal> = None;
        for offset in offsets.iter().take(limit) {
            let raw = center * (Decimal::ONE - side.sign() * *offset);
            let price = round_price(raw, instrument.tick_size);
            if price <= Decimal::ZERO || last_price == Some(price) {
                continue;
            }
            last_price = Some(price);
            quotes.push(Quote::new(side, price, size));
        }
    }
    quotes
}

/// `step_pct * k` for k = 1..=levels.
pub(crate) fn grid_offsets(step_pct: Decimal, levels: usize) -> Vec<Decimal> {
    (1..=levels).map(|k| step_pct * Decimal::from(k)).collect()
}
