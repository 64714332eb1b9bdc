use crate::domain::entities::account::AccountId;
use crate::domain::entities::order::OrderSide;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
            PositionSide::Flat => write!(f, "FLAT"),
        }
    }
}

/// Signed holding of one account in one instrument.
///
/// A zero quantity is flat; the row is kept so the next trade starts a fresh
/// average from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub account_id: AccountId,
    pub instrument_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub average_cost: Cents,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of applying one fill to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    pub notional: Cents,
    /// PnL realized by the part of the fill that reduced the position,
    /// measured against the average cost before the fill.
    pub realized_pnl: Cents,
}

impl Position {
    pub fn flat(account_id: AccountId, instrument_id: i64, symbol: &str) -> Self {
        Position {
            account_id,
            instrument_id,
            symbol: symbol.to_string(),
            quantity: 0,
            average_cost: Cents::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn side(&self) -> PositionSide {
        match self.quantity {
            q if q > 0 => PositionSide::Long,
            q if q < 0 => PositionSide::Short,
            _ => PositionSide::Flat,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Splits a trade into the quantities to apply, in order.
    ///
    /// A trade that would carry the position across zero becomes two legs: one
    /// that closes the existing position exactly, then one that opens the
    /// remainder on the other side. Anything else is a single leg.
    pub fn split_legs(&self, side: OrderSide, quantity: i64) -> Vec<i64> {
        let opposing = match side {
            OrderSide::Buy => self.quantity < 0,
            OrderSide::Sell => self.quantity > 0,
        };
        let held = self.quantity.abs();

        if opposing && quantity > held {
            vec![held, quantity - held]
        } else {
            vec![quantity]
        }
    }

    /// Applies one fill at `price`.
    ///
    /// The new average is `|avg * qty ± notional| / |new_qty|` with the cost
    /// basis signed like the quantity, so adding to a short averages the same
    /// way as adding to a long. A fill that lands exactly on zero resets the
    /// average.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        quantity: i64,
        price: Cents,
    ) -> Result<FillOutcome, ValidationError> {
        if quantity <= 0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "fill quantity must be positive, got {}",
                quantity
            )));
        }

        let notional = price
            .checked_mul(quantity)
            .ok_or(ValidationError::Overflow("order notional"))?;

        let realized_pnl = self.realized_pnl_for(side, quantity, price)?;

        let signed_qty = side.sign() * quantity;
        let new_quantity = self
            .quantity
            .checked_add(signed_qty)
            .ok_or(ValidationError::Overflow("position quantity"))?;

        if new_quantity == 0 {
            self.average_cost = Cents::ZERO;
        } else {
            let signed_cost = self.average_cost.value() as i128 * self.quantity as i128;
            let signed_notional = side.sign() as i128 * notional.value() as i128;
            let average = (signed_cost + signed_notional).abs() / (new_quantity as i128).abs();
            let average =
                i64::try_from(average).map_err(|_| ValidationError::Overflow("average cost"))?;
            self.average_cost = Cents::new(average);
        }

        self.quantity = new_quantity;
        self.updated_at = Utc::now();

        Ok(FillOutcome {
            notional,
            realized_pnl,
        })
    }

    fn realized_pnl_for(
        &self,
        side: OrderSide,
        quantity: i64,
        price: Cents,
    ) -> Result<Cents, ValidationError> {
        let closing = match (self.side(), side) {
            (PositionSide::Long, OrderSide::Sell) | (PositionSide::Short, OrderSide::Buy) => {
                quantity.min(self.quantity.abs())
            }
            _ => return Ok(Cents::ZERO),
        };

        let per_unit = match self.side() {
            PositionSide::Long => price - self.average_cost,
            _ => self.average_cost - price,
        };
        per_unit
            .checked_mul(closing)
            .ok_or(ValidationError::Overflow("realized pnl"))
    }

    /// `avg * |qty|`.
    pub fn cost_basis(&self) -> Cents {
        Cents::new(self.average_cost.value().saturating_mul(self.quantity.abs()))
    }

    /// Signed `qty * price`; negative for shorts.
    pub fn market_value(&self, price: Cents) -> Cents {
        Cents::new(price.value().saturating_mul(self.quantity))
    }

    /// `(price - avg) * qty` for longs, `(avg - price) * |qty|` for shorts.
    pub fn unrealized_pnl(&self, price: Cents) -> Cents {
        match self.side() {
            PositionSide::Long => {
                Cents::new((price - self.average_cost).value().saturating_mul(self.quantity))
            }
            PositionSide::Short => Cents::new(
                (self.average_cost - price)
                    .value()
                    .saturating_mul(self.quantity.abs()),
            ),
            PositionSide::Flat => Cents::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(quantity: i64, average_cost: i64) -> Position {
        Position {
            quantity,
            average_cost: Cents::new(average_cost),
            ..Position::flat(1, 1, "ACME")
        }
    }

    #[test]
    fn test_open_long_from_flat() {
        let mut p = position(0, 0);
        let outcome = p.apply_fill(OrderSide::Buy, 100, Cents::new(500)).unwrap();
        assert_eq!(p.quantity, 100);
        assert_eq!(p.average_cost, Cents::new(500));
        assert_eq!(outcome.notional, Cents::new(50000));
        assert_eq!(outcome.realized_pnl, Cents::ZERO);
    }

    #[test]
    fn test_same_direction_buys_average_weighted() {
        let mut p = position(0, 0);
        p.apply_fill(OrderSide::Buy, 10, Cents::new(100)).unwrap();
        p.apply_fill(OrderSide::Buy, 30, Cents::new(200)).unwrap();
        // (10*100 + 30*200) / 40 = 175
        assert_eq!(p.average_cost, Cents::new(175));
        assert_eq!(p.quantity, 40);
    }

    #[test]
    fn test_same_direction_sells_average_weighted_for_shorts() {
        let mut p = position(0, 0);
        p.apply_fill(OrderSide::Sell, 30, Cents::new(450)).unwrap();
        p.apply_fill(OrderSide::Sell, 10, Cents::new(490)).unwrap();
        // (30*450 + 10*490) / 40 = 460
        assert_eq!(p.average_cost, Cents::new(460));
        assert_eq!(p.quantity, -40);
    }

    #[test]
    fn test_close_to_zero_resets_average() {
        let mut p = position(50, 400);
        let outcome = p.apply_fill(OrderSide::Sell, 50, Cents::new(450)).unwrap();
        assert_eq!(p.quantity, 0);
        assert_eq!(p.average_cost, Cents::ZERO);
        assert_eq!(outcome.realized_pnl, Cents::new(2500));
    }

    #[test]
    fn test_split_legs_on_flip() {
        assert_eq!(position(50, 400).split_legs(OrderSide::Sell, 80), vec![50, 30]);
        assert_eq!(position(-20, 400).split_legs(OrderSide::Buy, 25), vec![20, 5]);
    }

    #[test]
    fn test_split_legs_without_flip() {
        assert_eq!(position(50, 400).split_legs(OrderSide::Sell, 50), vec![50]);
        assert_eq!(position(50, 400).split_legs(OrderSide::Sell, 20), vec![20]);
        assert_eq!(position(50, 400).split_legs(OrderSide::Buy, 80), vec![80]);
        assert_eq!(position(0, 0).split_legs(OrderSide::Sell, 80), vec![80]);
    }

    #[test]
    fn test_flip_legs_open_short_at_current_price() {
        let mut p = position(50, 400);
        let price = Cents::new(450);
        let legs = p.split_legs(OrderSide::Sell, 80);
        let close = p.apply_fill(OrderSide::Sell, legs[0], price).unwrap();
        let open = p.apply_fill(OrderSide::Sell, legs[1], price).unwrap();

        assert_eq!(close.realized_pnl, Cents::new(2500));
        assert_eq!(open.realized_pnl, Cents::ZERO);
        assert_eq!(p.quantity, -30);
        assert_eq!(p.average_cost, Cents::new(450));
    }

    #[test]
    fn test_short_cover_realizes_profit() {
        let mut p = position(-10, 500);
        let outcome = p.apply_fill(OrderSide::Buy, 4, Cents::new(450)).unwrap();
        assert_eq!(outcome.realized_pnl, Cents::new(200));
        assert_eq!(p.quantity, -6);
        // (-10 * 500 + 4 * 450) / 6, truncated
        assert_eq!(p.average_cost, Cents::new(533));
    }

    #[test]
    fn test_unrealized_pnl_long_and_short() {
        assert_eq!(position(10, 400).unrealized_pnl(Cents::new(450)), Cents::new(500));
        assert_eq!(position(-10, 400).unrealized_pnl(Cents::new(450)), Cents::new(-500));
        assert_eq!(position(0, 0).unrealized_pnl(Cents::new(450)), Cents::ZERO);
    }

    #[test]
    fn test_cost_basis_and_market_value() {
        let p = position(-10, 400);
        assert_eq!(p.cost_basis(), Cents::new(4000));
        assert_eq!(p.market_value(Cents::new(450)), Cents::new(-4500));
    }

    #[test]
    fn test_rejects_non_positive_fill() {
        let mut p = position(0, 0);
        assert!(p.apply_fill(OrderSide::Buy, 0, Cents::new(100)).is_err());
    }

    #[test]
    fn test_notional_overflow_is_validation_error() {
        let mut p = position(0, 0);
        let result = p.apply_fill(OrderSide::Buy, i64::MAX, Cents::new(100));
        assert!(matches!(result, Err(ValidationError::Overflow(_))));
        assert_eq!(p.quantity, 0);
    }
}
