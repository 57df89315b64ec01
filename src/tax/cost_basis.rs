use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::db::models::Position;
use crate::error::SettlementError;

/// Weighted-average cost basis mutations.
///
/// Both operations are pure: they return the next version of the position and
/// leave `self` untouched, so a failed step never leaves a half-applied ledger.
impl Position {
    /// Empty position, opened by the first purchase.
    pub fn open(investor: &str, security: &str, opened_on: NaiveDate) -> Self {
        Self {
            id: None,
            investor: investor.to_string(),
            security: security.to_string(),
            opened_on,
            quantity: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            average_cost: Decimal::ZERO,
        }
    }

    /// Add a purchase of `quantity` at `unit_price` carrying `allocated_taxes`.
    pub fn apply_purchase(
        &self,
        quantity: Decimal,
        unit_price: Decimal,
        allocated_taxes: Decimal,
    ) -> Result<Position> {
        if quantity <= Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "purchase of {} must have a positive quantity, got {}",
                self.security, quantity
            ))
            .into());
        }
        if unit_price < Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "purchase of {} has a negative price {}",
                self.security, unit_price
            ))
            .into());
        }

        let quantity_after = self.quantity + quantity;
        let total_after = self.total_cost + (unit_price * quantity + allocated_taxes);

        Ok(Position {
            quantity: quantity_after,
            total_cost: total_after,
            average_cost: total_after / quantity_after,
            ..self.clone()
        })
    }

    /// Remove `quantity` valued at the average cost held before the sale.
    pub fn apply_sale(&self, quantity: Decimal, average_cost_at_sale: Decimal) -> Result<Position> {
        if quantity <= Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "sale of {} must have a positive quantity, got {}",
                self.security, quantity
            ))
            .into());
        }
        if quantity > self.quantity {
            return Err(SettlementError::NegativePositionQuantity {
                security: self.security.clone(),
                requested: quantity,
                held: self.quantity,
            }
            .into());
        }

        let quantity_after = self.quantity - quantity;
        if quantity_after.is_zero() {
            return Ok(Position {
                quantity: Decimal::ZERO,
                total_cost: Decimal::ZERO,
                average_cost: Decimal::ZERO,
                ..self.clone()
            });
        }

        let total_after = self.total_cost - average_cost_at_sale * quantity;
        Ok(Position {
            quantity: quantity_after,
            total_cost: total_after,
            average_cost: total_after / quantity_after,
            ..self.clone()
        })
    }

    /// Cost basis of `quantity` units at the current average.
    pub fn cost_of(&self, quantity: Decimal) -> Decimal {
        self.average_cost * quantity
    }

    pub fn is_open(&self) -> bool {
        self.quantity > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn empty() -> Position {
        Position::open("investor-1", "ABCD3", NaiveDate::from_ymd_opt(2025, 1, 10).unwrap())
    }

    fn assert_invariant(position: &Position) {
        if position.quantity > Decimal::ZERO {
            let diff = (position.average_cost - position.total_cost / position.quantity).abs();
            assert!(diff <= dec!(0.000001), "average drifted: {:?}", position);
        }
        assert!(position.quantity >= Decimal::ZERO);
    }

    #[test]
    fn test_avg_cost_simple() {
        let position = empty().apply_purchase(dec!(100), dec!(10), dec!(0)).unwrap();
        let position = position.apply_sale(dec!(50), position.average_cost).unwrap();

        assert_eq!(position.quantity, dec!(50));
        assert_eq!(position.average_cost, dec!(10));
        assert_eq!(position.total_cost, dec!(500));
    }

    #[test]
    fn test_avg_cost_multiple_buys() {
        let position = empty()
            .apply_purchase(dec!(100), dec!(10), dec!(0))
            .unwrap()
            .apply_purchase(dec!(50), dec!(20), dec!(0))
            .unwrap();

        assert_eq!(position.quantity, dec!(150));
        assert_eq!(position.total_cost, dec!(2000));
        assert_eq!(position.average_cost, dec!(2000) / dec!(150));
        assert_invariant(&position);
    }

    #[test]
    fn test_avg_cost_with_fees() {
        let position = empty().apply_purchase(dec!(100), dec!(10.00), dec!(0.30)).unwrap();
        assert_eq!(position.quantity, dec!(100));
        assert_eq!(position.average_cost, dec!(10.003));

        let sold = position.apply_sale(dec!(40), position.average_cost).unwrap();
        assert_eq!(sold.quantity, dec!(60));
        assert_eq!(sold.total_cost, dec!(600.18));
        assert_eq!(sold.average_cost, dec!(10.003));
    }

    #[test]
    fn test_avg_cost_oversell() {
        let position = empty().apply_purchase(dec!(10), dec!(10), dec!(0)).unwrap();
        let err = position.apply_sale(dec!(20), position.average_cost).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SettlementError>(),
            Some(SettlementError::NegativePositionQuantity { held, .. }) if *held == dec!(10)
        ));
        // original untouched
        assert_eq!(position.quantity, dec!(10));
    }

    #[test]
    fn test_purchase_requires_positive_quantity() {
        assert!(empty().apply_purchase(dec!(0), dec!(10), dec!(0)).is_err());
        assert!(empty().apply_purchase(dec!(-5), dec!(10), dec!(0)).is_err());
        assert!(empty().apply_purchase(dec!(5), dec!(-1), dec!(0)).is_err());
    }

    #[test]
    fn test_close_and_reopen() {
        let position = empty().apply_purchase(dec!(3), dec!(33.33), dec!(0.01)).unwrap();
        let closed = position.apply_sale(dec!(3), position.average_cost).unwrap();
        assert_eq!(closed.quantity, dec!(0));
        assert_eq!(closed.total_cost, dec!(0));
        assert!(!closed.is_open());

        let reopened = closed.apply_purchase(dec!(10), dec!(5), dec!(1)).unwrap();
        assert_eq!(reopened.average_cost, dec!(5.1));
        assert_invariant(&reopened);
    }

    #[test]
    fn test_invariant_over_sequence() {
        let mut position = empty();
        let steps = [
            (true, dec!(7), dec!(13.37), dec!(0.11)),
            (true, dec!(13), dec!(12.01), dec!(0.07)),
            (false, dec!(5), dec!(15.00), dec!(0)),
            (true, dec!(101), dec!(9.99), dec!(1.23)),
            (false, dec!(33), dec!(11.00), dec!(0)),
        ];
        for (is_purchase, qty, price, taxes) in steps {
            position = if is_purchase {
                position.apply_purchase(qty, price, taxes).unwrap()
            } else {
                position.apply_sale(qty, position.average_cost).unwrap()
            };
            assert_invariant(&position);
        }
        assert_eq!(position.quantity, dec!(83));
        assert_eq!(position.cost_of(dec!(1)), position.average_cost);
    }
}
