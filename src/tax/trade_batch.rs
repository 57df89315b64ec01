//! Monthly trade batch: realized results per asset class and the income tax due
//!
//! A month is absent until the first sale touches it, open while an invoice
//! records its trades, and closed again once `finalize` has written it back.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::catalog::{Tax, TaxCode, TaxRates, TaxScope};
use super::group::{TaxGroup, TaxInstance};
use super::loss_carryforward::seed_buckets;
use super::trade::TradeSettlement;
use crate::db::models::{AssetClass, TradeBatch, TradeBatchData};
use crate::error::Result;
use crate::repository::{TaxCatalog, TaxGroupRepository, TradeBatchRepository};
use crate::settlement::context::SettlementContext;
use crate::utils::month_start;

/// Income tax outcome of one asset class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassAssessment {
    pub net_result: Decimal,
    pub exempt: bool,
    pub fee: Decimal,
}

/// Income tax of a month across classes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomeTaxAssessment {
    pub classes: BTreeMap<AssetClass, ClassAssessment>,
    /// Sum of the non-exempt classes' net results
    pub base: Decimal,
    pub fee: Decimal,
}

/// Compute the month's income tax from its buckets.
///
/// Shares are exempt up to the monthly sale volume limit; every class is exempt
/// with a non-positive net result or when the combined net result does not
/// exceed the combined accumulated loss.
pub fn assess_income_tax(
    buckets: &BTreeMap<AssetClass, TradeBatchData>,
    rates: &TaxRates,
) -> IncomeTaxAssessment {
    let total_loss: Decimal = buckets.values().map(|b| b.accumulated_loss).sum();
    let total_results: Decimal = buckets.values().map(|b| b.current_results).sum();
    let total_taxes: Decimal = buckets.values().map(|b| b.total_tax).sum();
    let combined_exempt = total_results - total_taxes <= total_loss;

    let mut classes = BTreeMap::new();
    let mut base = Decimal::ZERO;
    let mut fee = Decimal::ZERO;

    for class in AssetClass::ALL {
        let data = buckets.get(&class).cloned().unwrap_or_default();
        let net_result = data.net_result();

        let below_volume = class == AssetClass::Share
            && data.total_trade_volume <= rates.exemption_limit;
        let exempt = below_volume || net_result <= Decimal::ZERO || combined_exempt;

        let class_fee = if exempt {
            Decimal::ZERO
        } else {
            base += net_result;
            net_result * rates.income_tax
        };
        fee += class_fee;

        classes.insert(
            class,
            ClassAssessment {
                net_result,
                exempt,
                fee: class_fee,
            },
        );
    }

    IncomeTaxAssessment { classes, base, fee }
}

/// Tax group of a new month: a single income tax instance, zero until trades arrive.
pub fn trade_batch_tax_group(month_start: NaiveDate, rates: &TaxRates) -> Result<TaxGroup> {
    let mut group = TaxGroup::new(TaxScope::TradeBatch, month_start);
    group.push(TaxInstance::new(
        Tax::new(TaxCode::IncomeTax, TaxScope::TradeBatch.source(), rates.income_tax),
        month_start,
        Decimal::ZERO,
        Decimal::ZERO,
        rates.income_tax,
    ))?;
    Ok(group)
}

/// A month accepting trades. Consumed by `finalize`.
#[derive(Debug)]
pub struct OpenTradeBatch {
    batch: TradeBatch,
    trades: usize,
}

impl OpenTradeBatch {
    /// Open the month containing `market_date`, creating and seeding it if absent.
    pub fn open<S>(
        store: &mut S,
        ctx: &mut SettlementContext,
        investor: &str,
        market_date: NaiveDate,
        rates: &TaxRates,
    ) -> Result<Self>
    where
        S: TradeBatchRepository + TaxCatalog + TaxGroupRepository + ?Sized,
    {
        let month = month_start(market_date);

        if let Some(batch) = store.find_trade_batch(investor, month)? {
            debug!("Resuming trade batch {} for {}", month, investor);
            return Ok(Self { batch, trades: 0 });
        }

        let previous = store.find_latest_trade_batch(investor, month)?;
        let buckets = seed_buckets(previous.as_ref());
        if let Some(previous) = &previous {
            info!(
                "Seeding trade batch {} for {} from {}",
                month, investor, previous.month_start
            );
        }

        let tax_group = ctx.persist_group(store, trade_batch_tax_group(month, rates)?)?;
        let batch = store.create_trade_batch(&TradeBatch {
            id: None,
            investor: investor.to_string(),
            month_start: month,
            tax_group,
            buckets,
        })?;
        info!("Opened trade batch {} for {}", month, investor);

        Ok(Self { batch, trades: 0 })
    }

    pub fn batch(&self) -> &TradeBatch {
        &self.batch
    }

    /// Add one sale to its class bucket and recompute the income tax.
    pub fn record_trade(
        &mut self,
        class: AssetClass,
        trade: &TradeSettlement,
        rates: &TaxRates,
    ) -> Result<()> {
        let bucket = self.batch.bucket_mut(class);
        bucket.current_results += trade.raw_result;
        bucket.total_tax += trade.total_tax;
        if class == AssetClass::Share {
            bucket.total_trade_volume += trade.proceeds;
        }
        self.trades += 1;

        let assessment = assess_income_tax(&self.batch.buckets, rates);
        let instance = self.batch.tax_group.instance_mut(TaxCode::IncomeTax)?;
        instance.base_value = assessment.base;
        instance.tax_value = assessment.fee;

        debug!(
            "Trade batch {} {}: result {} tax {} -> IR {}",
            self.batch.month_start,
            class.as_str(),
            trade.raw_result,
            trade.total_tax,
            assessment.fee
        );
        Ok(())
    }

    /// Write the batch and its income tax instance back.
    pub fn finalize<S>(self, store: &mut S) -> Result<TradeBatch>
    where
        S: TradeBatchRepository + TaxGroupRepository + ?Sized,
    {
        store.update_tax_instances(self.batch.tax_group.taxes())?;
        store.update_trade_batch(&self.batch)?;
        info!(
            "Finalized trade batch {} for {} ({} trades, IR {})",
            self.batch.month_start,
            self.batch.investor,
            self.trades,
            self.batch.tax_group.value_of(TaxCode::IncomeTax)
        );
        Ok(self.batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buckets(entries: &[(AssetClass, TradeBatchData)]) -> BTreeMap<AssetClass, TradeBatchData> {
        entries.iter().cloned().collect()
    }

    fn data(acc: Decimal, results: Decimal, tax: Decimal, volume: Decimal) -> TradeBatchData {
        TradeBatchData {
            accumulated_loss: acc,
            current_results: results,
            total_tax: tax,
            total_trade_volume: volume,
        }
    }

    #[test]
    fn test_share_profit_above_limit() {
        let b = buckets(&[(AssetClass::Share, data(dec!(0), dec!(500), dec!(0), dec!(25000)))]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert_eq!(assessment.fee, dec!(75));
        assert_eq!(assessment.base, dec!(500));
        assert!(!assessment.classes[&AssetClass::Share].exempt);
    }

    #[test]
    fn test_share_exempt_at_limit() {
        let b = buckets(&[(AssetClass::Share, data(dec!(0), dec!(5000), dec!(0), dec!(20000)))]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert_eq!(assessment.fee, dec!(0));
        assert_eq!(assessment.base, dec!(0));
        assert!(assessment.classes[&AssetClass::Share].exempt);
    }

    #[test]
    fn test_fund_has_no_volume_exemption() {
        let b = buckets(&[(AssetClass::Fund, data(dec!(0), dec!(100), dec!(0), dec!(0)))]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert_eq!(assessment.fee, dec!(15));
        assert_eq!(assessment.classes[&AssetClass::Fund].fee, dec!(15));
    }

    #[test]
    fn test_net_of_taxes() {
        let b = buckets(&[(
            AssetClass::DepositaryReceipt,
            data(dec!(0), dec!(100), dec!(20), dec!(0)),
        )]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert_eq!(assessment.base, dec!(80));
        assert_eq!(assessment.fee, dec!(12));
    }

    #[test]
    fn test_loss_is_exempt() {
        let b = buckets(&[
            (AssetClass::Share, data(dec!(0), dec!(-300), dec!(0), dec!(30000))),
            (AssetClass::Fund, data(dec!(0), dec!(100), dec!(0), dec!(0))),
        ]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert!(assessment.classes[&AssetClass::Share].exempt);
        // combined net -200 does not exceed combined loss 0
        assert!(assessment.classes[&AssetClass::Fund].exempt);
        assert_eq!(assessment.fee, dec!(0));
    }

    #[test]
    fn test_classes_add_up() {
        let b = buckets(&[
            (AssetClass::Share, data(dec!(0), dec!(1000), dec!(0), dec!(40000))),
            (AssetClass::Fund, data(dec!(0), dec!(200), dec!(0), dec!(0))),
        ]);
        let assessment = assess_income_tax(&b, &TaxRates::default());
        assert_eq!(assessment.fee, dec!(180));
        assert_eq!(assessment.base, dec!(1200));
    }

    #[test]
    fn test_batch_group_has_income_tax_instance() {
        let month = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let group = trade_batch_tax_group(month, &TaxRates::default()).unwrap();
        assert_eq!(group.external_id, 520250201);
        let ir = group.instance(TaxCode::IncomeTax).unwrap();
        assert_eq!(ir.tax_rate, dec!(0.15));
        assert_eq!(ir.tax_value, dec!(0));
        assert_eq!(ir.tax.source, "TDB");
    }
}
