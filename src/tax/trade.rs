use anyhow::Result;
use rust_decimal::Decimal;

use super::group::TaxGroup;
use crate::db::models::Position;
use crate::error::SettlementError;

/// Result of settling one sale line against the average-cost position
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSettlement {
    pub quantity: Decimal,
    /// Position average cost before the sale
    pub cost_basis: Decimal,
    pub cost: Decimal,
    pub proceeds: Decimal,
    pub raw_result: Decimal,
    pub total_tax: Decimal,
    pub average_price: Decimal,
}

/// Settle a sale of `quantity` at `sell_price`.
///
/// Cost is taken at the position's average before the sale. Returns the
/// settlement together with the position after the sale.
pub fn settle_sale(
    position: &Position,
    quantity: Decimal,
    sell_price: Decimal,
    taxes: &TaxGroup,
) -> Result<(TradeSettlement, Position)> {
    if quantity <= Decimal::ZERO {
        return Err(SettlementError::ValidationError(format!(
            "sale of {} must have a positive quantity, got {}",
            position.security, quantity
        ))
        .into());
    }

    let cost_basis = position.average_cost;
    let cost = position.cost_of(quantity);
    let proceeds = sell_price * quantity;
    let total_tax = taxes.total();

    let next = position.apply_sale(quantity, cost_basis)?;

    Ok((
        TradeSettlement {
            quantity,
            cost_basis,
            cost,
            proceeds,
            raw_result: proceeds - cost,
            total_tax,
            average_price: (proceeds + total_tax) / quantity,
        },
        next,
    ))
}
