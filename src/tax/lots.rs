use anyhow::Result;
use itertools::Itertools;
use rust_decimal::Decimal;

use crate::db::models::{Lot, Position};
use crate::error::SettlementError;

/// Quantity taken from one lot by a sale
#[derive(Debug, Clone, PartialEq)]
pub struct LotConsumption {
    pub lot_id: i64,
    pub taken: Decimal,
    pub remaining_balance: Decimal,
}

/// Match a sale against open lots, most recent acquisition first.
///
/// Returns the consumptions in matching order; nothing is mutated. Selling
/// more than the open balance is an error, never a partial match.
pub fn match_sale(security: &str, lots: &[Lot], quantity: Decimal) -> Result<Vec<LotConsumption>> {
    if quantity <= Decimal::ZERO {
        return Err(SettlementError::ValidationError(format!(
            "sale of {} must have a positive quantity, got {}",
            security, quantity
        ))
        .into());
    }

    let open = lots
        .iter()
        .filter(|lot| lot.remaining_balance > Decimal::ZERO)
        .sorted_by(|a, b| {
            b.acquired_on
                .cmp(&a.acquired_on)
                .then(b.sequence.cmp(&a.sequence))
                .then(b.id.cmp(&a.id))
        });

    let mut pending = quantity;
    let mut consumptions = Vec::new();

    for lot in open {
        let lot_id = lot.id.ok_or_else(|| {
            SettlementError::DbError(format!("open lot of {} has no id", security))
        })?;
        let taken = pending.min(lot.remaining_balance);

        consumptions.push(LotConsumption {
            lot_id,
            taken,
            remaining_balance: lot.remaining_balance - taken,
        });

        pending -= taken;
        if pending.is_zero() {
            break;
        }
    }

    if pending > Decimal::ZERO {
        return Err(SettlementError::InsufficientLotBalance {
            security: security.to_string(),
            requested: quantity,
            available: quantity - pending,
        }
        .into());
    }

    Ok(consumptions)
}

/// Sum of what is still open across lots.
pub fn open_balance(lots: &[Lot]) -> Decimal {
    lots.iter().map(|lot| lot.remaining_balance).sum()
}

/// Lots and the average-cost position are kept in parallel and must agree.
pub fn check_agreement(position: &Position, lots: &[Lot]) -> Result<()> {
    let lots_total = open_balance(lots);
    if lots_total != position.quantity {
        return Err(SettlementError::LedgerMismatch {
            security: position.security.clone(),
            lots: lots_total,
            position: position.quantity,
        }
        .into());
    }
    Ok(())
}
