use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::db::models::{AssetClass, TradeBatch, TradeBatchData};

/// Loss carried out of a closed month: what is left after netting the month's
/// results and taxes, never positive. Gains do not carry.
pub fn carried_loss(previous: &TradeBatchData) -> Decimal {
    (previous.accumulated_loss + previous.current_results - previous.total_tax).min(Decimal::ZERO)
}

/// Opening buckets of a month, seeded from the latest earlier month if any.
///
/// Every class is present; only the accumulated loss survives the rollover.
pub fn seed_buckets(previous: Option<&TradeBatch>) -> BTreeMap<AssetClass, TradeBatchData> {
    AssetClass::ALL
        .iter()
        .map(|class| {
            let accumulated_loss = previous
                .map(|batch| carried_loss(&batch.bucket(*class)))
                .unwrap_or(Decimal::ZERO);
            (
                *class,
                TradeBatchData {
                    accumulated_loss,
                    ..TradeBatchData::default()
                },
            )
        })
        .collect()
}
