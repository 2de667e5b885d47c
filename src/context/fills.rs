//! Fill accounting with average-cost realized P&L.

use rust_decimal::Decimal;

use crate::types::OrderSide;

/// Running totals of strategy fills.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillLedger {
    /// Net filled inventory (buys positive)
    pub inventory: Decimal,
    /// Average cost of the open inventory
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub bought: Decimal,
    pub sold: Decimal,
    pub buy_notional: Decimal,
    pub sell_notional: Decimal,
}

impl FillLedger {
    pub fn record(&mut self, side: OrderSide, qty: Decimal, price: Decimal) {
        if qty <= Decimal::ZERO {
            return;
        }
        match side {
            OrderSide::Buy => {
                self.bought += qty;
                self.buy_notional += qty * price;
            }
            OrderSide::Sell => {
                self.sold += qty;
                self.sell_notional += qty * price;
            }
        }

        let signed = qty * side.sign();
        let same_direction = self.inventory.is_zero()
            || self.inventory.is_sign_positive() == signed.is_sign_positive();

        if same_direction {
            let held = self.inventory.abs();
            self.avg_cost = (self.avg_cost * held + price * qty) / (held + qty);
            self.inventory += signed;
            return;
        }

        // Closing (possibly flipping) the open inventory
        let closed = qty.min(self.inventory.abs());
        let direction = if self.inventory.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        self.realized_pnl += closed * (price - self.avg_cost) * direction;
        self.inventory += signed;

        if self.inventory.is_zero() {
            self.avg_cost = Decimal::ZERO;
        } else if qty > closed {
            self.avg_cost = price;
        }
    }
}
